use tracing::{info, warn};

use thermostat_common::{
    config::{SensorConfig, SensorKind},
    Relay, SensorDriver, SensorError, SensorReading, StatusCode, StatusSignal,
};

pub struct SimulatedSensor {
    config: SensorConfig,
    tick: u64,
    fail_every: Option<u64>,
}

impl SimulatedSensor {
    pub fn new(config: SensorConfig, fail_every: Option<u64>) -> Self {
        info!(
            "simulated {:?} sensor on GPIO{}{}",
            config.kind,
            config.gpio,
            fail_every
                .map(|n| format!(", failing every {n} reads"))
                .unwrap_or_default()
        );
        Self {
            config,
            tick: 0,
            fail_every: fail_every.filter(|n| *n > 0),
        }
    }
}

impl SensorDriver for SimulatedSensor {
    fn read(&mut self) -> Result<SensorReading, SensorError> {
        self.tick = self.tick.saturating_add(1);

        if self.fail_every.is_some_and(|n| self.tick % n == 0) {
            return Err(SensorError::NoResponse(self.config.gpio));
        }

        let phase = (self.tick % 12) as f32;
        let temperature_c = 21.0 + (phase - 6.0).abs() * 0.25;
        let humidity = 45.0 + (self.tick % 6) as f32 * 0.5;

        // DHT11 only reports whole units.
        Ok(match self.config.kind {
            SensorKind::Dht11 => SensorReading {
                temperature_c: temperature_c.round(),
                humidity: humidity.round(),
            },
            SensorKind::Dht22 => SensorReading {
                temperature_c,
                humidity,
            },
        })
    }
}

pub struct LoggedRelay {
    gpio: u8,
}

impl LoggedRelay {
    pub fn new(gpio: u8) -> Self {
        Self { gpio }
    }
}

impl Relay for LoggedRelay {
    fn write(&mut self, energized: bool) {
        info!(
            "relay GPIO{} {}",
            self.gpio,
            if energized { "energized" } else { "released" }
        );
    }
}

pub struct LoggedStatusLed {
    gpio: u8,
}

impl LoggedStatusLed {
    pub fn new(gpio: u8) -> Self {
        Self { gpio }
    }
}

impl StatusSignal for LoggedStatusLed {
    fn signal(&self, code: StatusCode) {
        match code {
            StatusCode::SensorError => warn!("status LED GPIO{}: sensor error", self.gpio),
            StatusCode::NetworkReady => info!("status LED GPIO{}: network ready", self.gpio),
            StatusCode::Identify => info!("status LED GPIO{}: identify", self.gpio),
        }
    }
}
