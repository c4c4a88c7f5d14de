use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use thermostat_common::{
    SamplingConfig, SensorDriver, SensorError, SensorReading, ThermostatEngine,
};

// Every read is preceded by the poll interval; a good read is followed by
// the extra post-read delay, a failed one is retried after the poll
// interval alone.
pub struct Sampler<S> {
    engine: Arc<ThermostatEngine>,
    sensor: Arc<Mutex<S>>,
    poll_interval: Duration,
    post_read_delay: Duration,
}

impl<S> Sampler<S>
where
    S: SensorDriver + Send + 'static,
{
    pub fn new(engine: Arc<ThermostatEngine>, sensor: S, config: &SamplingConfig) -> Self {
        Self {
            engine,
            sensor: Arc::new(Mutex::new(sensor)),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            post_read_delay: Duration::from_millis(config.post_read_delay_ms),
        }
    }

    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(
            "sampling every {:?} (+{:?} after a good read)",
            self.poll_interval, self.post_read_delay
        );

        loop {
            if !pause(self.poll_interval, &mut stop).await {
                break;
            }

            match self.read().await {
                Ok(reading) => {
                    debug!(
                        "sensor: temperature {:.1}, humidity {:.1}",
                        reading.temperature_c, reading.humidity
                    );
                    self.engine.record_reading(reading);

                    if !pause(self.post_read_delay, &mut stop).await {
                        break;
                    }
                }
                Err(err) => {
                    warn!("sensor read failed: {err}");
                    self.engine.record_sensor_failure();
                }
            }
        }

        self.engine.shutdown();
        info!("sampling loop stopped");
    }

    async fn read(&self) -> Result<SensorReading, SensorError> {
        let sensor = self.sensor.clone();
        tokio::task::spawn_blocking(move || {
            sensor
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .read()
        })
        .await
        .unwrap_or_else(|err| Err(SensorError::Aborted(err.to_string())))
    }
}

async fn pause(duration: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    tokio::select! {
        _ = &mut sleep => true,
        stopped = async { stop.wait_for(|stopped| *stopped).await.is_ok() } => {
            if stopped {
                return false;
            }
            // Nobody can ask us to stop any more.
            sleep.await;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::time::Instant;

    use thermostat_common::{
        CharacteristicId, CharacteristicStore, CharacteristicValue, Notification, Relay,
        StatusCode, StatusSignal, ThermostatMode, ThermostatState,
    };

    use super::*;

    struct ScriptedSensor(VecDeque<Result<SensorReading, SensorError>>);

    impl ScriptedSensor {
        fn new(script: impl IntoIterator<Item = Result<SensorReading, SensorError>>) -> Self {
            Self(script.into_iter().collect())
        }
    }

    impl SensorDriver for ScriptedSensor {
        fn read(&mut self) -> Result<SensorReading, SensorError> {
            self.0.pop_front().unwrap_or(Err(SensorError::Timeout))
        }
    }

    struct PanickingSensor;

    impl SensorDriver for PanickingSensor {
        fn read(&mut self) -> Result<SensorReading, SensorError> {
            panic!("bus fault");
        }
    }

    struct NullRelay;

    impl Relay for NullRelay {
        fn write(&mut self, _energized: bool) {}
    }

    type Log<T> = Arc<Mutex<Vec<(Duration, T)>>>;

    struct TimedStatus {
        start: Instant,
        log: Log<StatusCode>,
    }

    impl StatusSignal for TimedStatus {
        fn signal(&self, code: StatusCode) {
            self.log.lock().unwrap().push((self.start.elapsed(), code));
        }
    }

    struct Rig {
        engine: Arc<ThermostatEngine>,
        notifications: Log<Notification>,
        signals: Log<StatusCode>,
    }

    impl Rig {
        fn new(mode: ThermostatMode) -> Self {
            let start = Instant::now();
            let store = Arc::new(CharacteristicStore::new());
            let notifications: Log<Notification> = Arc::default();
            let sink = notifications.clone();
            store.observe(Arc::new(move |n: &Notification| {
                sink.lock().unwrap().push((start.elapsed(), *n));
            }));

            let signals: Log<StatusCode> = Arc::default();
            let status = Arc::new(TimedStatus {
                start,
                log: signals.clone(),
            });
            let engine = Arc::new(ThermostatEngine::new(store, NullRelay, status));
            engine.bind();
            engine
                .store()
                .write(
                    CharacteristicId::TargetHeatingCoolingState,
                    CharacteristicValue::UInt8(mode.as_u8()),
                )
                .unwrap();
            notifications.lock().unwrap().clear();

            Self {
                engine,
                notifications,
                signals,
            }
        }

        fn spawn(
            &self,
            sensor: impl SensorDriver + Send + 'static,
        ) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
            let (stop_tx, stop_rx) = watch::channel(false);
            let sampler = Sampler::new(self.engine.clone(), sensor, &SamplingConfig::default());
            (stop_tx, tokio::spawn(sampler.run(stop_rx)))
        }

        fn times_of(&self, id: CharacteristicId) -> Vec<u64> {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, n)| n.id == id)
                .map(|(at, _)| at.as_secs())
                .collect()
        }

        fn failure_times(&self) -> Vec<u64> {
            self.signals
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, code)| *code == StatusCode::SensorError)
                .map(|(at, _)| at.as_secs())
                .collect()
        }
    }

    fn ok(temperature_c: f32) -> Result<SensorReading, SensorError> {
        Ok(SensorReading {
            temperature_c,
            humidity: 48.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn good_reads_run_on_a_thirty_second_cadence() {
        let rig = Rig::new(ThermostatMode::Off);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([ok(20.0), ok(20.5), ok(21.0)]));

        tokio::time::sleep(Duration::from_secs(95)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(rig.times_of(CharacteristicId::CurrentTemperature), vec![10, 40, 70]);
        assert_eq!(
            rig.times_of(CharacteristicId::CurrentRelativeHumidity),
            vec![10, 40, 70]
        );
        assert!(rig.failure_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heats_then_stops_once_target_is_passed() {
        let rig = Rig::new(ThermostatMode::Heat);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([ok(20.0), ok(23.0)]));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(rig.engine.store().current_state(), ThermostatState::Heating);
        assert!(rig.engine.is_relay_on());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rig.engine.store().current_state(), ThermostatState::Off);
        assert!(!rig.engine.is_relay_on());

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_trip_fail_safe_and_retry_at_base_interval() {
        let rig = Rig::new(ThermostatMode::Heat);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([
            ok(19.0),
            Err(SensorError::Checksum),
            Err(SensorError::NoResponse(14)),
            ok(19.5),
        ]));

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(rig.engine.store().current_state(), ThermostatState::Off);
        assert!(!rig.engine.is_relay_on());
        assert_eq!(rig.engine.store().current_temperature(), 19.0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(rig.failure_times(), vec![40, 50]);
        assert_eq!(rig.times_of(CharacteristicId::CurrentTemperature), vec![10, 60]);

        let states: Vec<_> = rig
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n.id == CharacteristicId::CurrentHeatingCoolingState)
            .map(|(at, n)| (at.as_secs(), n.value))
            .collect();
        // Heating already started when HEAT was written against the 17.0
        // power-on temperature, so the first sample changes nothing.
        assert_eq!(
            states,
            vec![
                (40, CharacteristicValue::UInt8(0)),
                (60, CharacteristicValue::UInt8(1)),
                // Stop releases the relay.
                (65, CharacteristicValue::UInt8(0)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn remote_write_between_samples_acts_immediately() {
        let rig = Rig::new(ThermostatMode::Heat);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([ok(21.0)]));

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(rig.engine.store().current_state(), ThermostatState::Heating);

        rig.engine
            .store()
            .write(
                CharacteristicId::TargetTemperature,
                CharacteristicValue::Float(20.0),
            )
            .unwrap();

        assert_eq!(rig.engine.store().current_state(), ThermostatState::Off);
        assert_eq!(rig.times_of(CharacteristicId::CurrentTemperature), vec![10]);

        stop.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_wait_ends_loop_without_reading() {
        let rig = Rig::new(ThermostatMode::Heat);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([ok(18.0)]));

        tokio::time::sleep(Duration::from_secs(5)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert!(rig.times_of(CharacteristicId::CurrentTemperature).is_empty());
        assert!(!rig.engine.is_relay_on());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_stop_handle_keeps_sampling_on_cadence() {
        let rig = Rig::new(ThermostatMode::Off);
        let (stop, handle) = rig.spawn(ScriptedSensor::new([ok(20.0), ok(20.5), ok(21.0)]));
        drop(stop);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(!handle.is_finished());
        handle.abort();

        assert_eq!(rig.times_of(CharacteristicId::CurrentTemperature), vec![10, 40, 70]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_sensor_counts_as_failure() {
        let rig = Rig::new(ThermostatMode::Cool);
        let (stop, handle) = rig.spawn(PanickingSensor);

        tokio::time::sleep(Duration::from_secs(25)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(rig.failure_times(), vec![10, 20]);
        assert_eq!(rig.engine.sensor_health().consecutive_failures, 2);
    }
}
