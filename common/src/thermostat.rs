use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    characteristics::{CharacteristicId, CharacteristicStore, CharacteristicValue},
    decision::{decide, Decision},
    hardware::{Relay, StatusCode, StatusSignal},
    types::{ControllerStatus, SensorHealth, SensorReading, ThermostatState},
};

struct DecisionState {
    relay: Box<dyn Relay + Send>,
    relay_on: bool,
    last_reading_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

// Every read-decide-apply runs under `state`. Store observers fire inside
// that lock and must not write back into the store.
pub struct ThermostatEngine {
    store: Arc<CharacteristicStore>,
    state: Mutex<DecisionState>,
    status: Arc<dyn StatusSignal + Send + Sync>,
}

impl ThermostatEngine {
    pub fn new(
        store: Arc<CharacteristicStore>,
        relay: impl Relay + Send + 'static,
        status: Arc<dyn StatusSignal + Send + Sync>,
    ) -> Self {
        let mut relay: Box<dyn Relay + Send> = Box::new(relay);
        relay.write(false);

        Self {
            store,
            state: Mutex::new(DecisionState {
                relay,
                relay_on: false,
                last_reading_at: None,
                consecutive_failures: 0,
            }),
            status,
        }
    }

    pub fn bind(self: &Arc<Self>) {
        for id in [
            CharacteristicId::TargetTemperature,
            CharacteristicId::TargetHeatingCoolingState,
        ] {
            let engine = Arc::downgrade(self);
            self.store.on_write(
                id,
                Arc::new(move |id: CharacteristicId, value: CharacteristicValue| {
                    if let Some(engine) = engine.upgrade() {
                        debug!("remote write {id}={value}, re-evaluating");
                        engine.reevaluate();
                    }
                }),
            );
        }
    }

    pub fn store(&self) -> &Arc<CharacteristicStore> {
        &self.store
    }

    pub fn reevaluate(&self) -> Decision {
        let mut state = self.lock();
        self.evaluate(&mut state)
    }

    pub fn record_reading(&self, reading: SensorReading) -> Decision {
        let mut state = self.lock();
        self.store.set_current_temperature(reading.temperature_c);
        self.store.set_current_humidity(reading.humidity);
        state.last_reading_at = Some(Utc::now());
        state.consecutive_failures = 0;
        self.evaluate(&mut state)
    }

    // Fail-safe for an unreadable sensor: heating/cooling stops, stored
    // readings stay as they were. Returns whether the relay was switched
    // off by this call.
    pub fn record_sensor_failure(&self) -> bool {
        let tripped = {
            let mut state = self.lock();
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            if state.consecutive_failures == 1 || state.consecutive_failures % 10 == 0 {
                warn!(
                    "sensor unavailable ({} consecutive failures)",
                    state.consecutive_failures
                );
            }
            self.force_off(&mut state)
        };

        self.status.signal(StatusCode::SensorError);
        tripped
    }

    pub fn shutdown(&self) {
        let mut state = self.lock();
        if self.force_off(&mut state) {
            info!("relay released on shutdown");
        }
    }

    pub fn signal(&self, code: StatusCode) {
        self.status.signal(code);
    }

    pub fn is_relay_on(&self) -> bool {
        self.lock().relay_on
    }

    pub fn sensor_health(&self) -> SensorHealth {
        let state = self.lock();
        SensorHealth {
            last_reading_at: state.last_reading_at,
            consecutive_failures: state.consecutive_failures,
        }
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.lock();
        let values = self.store.snapshot();
        ControllerStatus {
            current_temp: values.current_temperature,
            current_humidity: values.current_humidity,
            target_temp: values.target_temperature,
            mode: values.target_mode.as_str(),
            state: values.current_state.as_str(),
            relay_on: state.relay_on,
            display_units: values.display_units,
            sensor: SensorHealth {
                last_reading_at: state.last_reading_at,
                consecutive_failures: state.consecutive_failures,
            },
        }
    }

    fn evaluate(&self, state: &mut DecisionState) -> Decision {
        let values = self.store.snapshot();
        let decision = decide(
            values.target_mode,
            values.target_temperature,
            values.current_temperature,
            values.current_state,
        );

        if decision.changed {
            info!(
                "{} -> {} (mode {}, current {:.1}, target {:.1})",
                values.current_state.as_str(),
                decision.state.as_str(),
                values.target_mode.as_str(),
                values.current_temperature,
                values.target_temperature,
            );
            self.apply(state, decision.state);
        }

        decision
    }

    fn force_off(&self, state: &mut DecisionState) -> bool {
        if self.store.current_state() == ThermostatState::Off {
            return false;
        }
        self.apply(state, ThermostatState::Off);
        true
    }

    fn apply(&self, state: &mut DecisionState, next: ThermostatState) {
        let energized = next.is_energized();
        state.relay.write(energized);
        state.relay_on = energized;
        self.store.set_current_state(next);
    }

    fn lock(&self) -> MutexGuard<'_, DecisionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
