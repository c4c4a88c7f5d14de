pub mod accessory;
pub mod characteristics;
pub mod config;
pub mod decision;
pub mod hardware;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use accessory::AccessoryInfo;
pub use characteristics::{
    CharacteristicId, CharacteristicSnapshot, CharacteristicStore, CharacteristicValue,
    Notification, StoreError,
};
pub use config::{ConfigError, RuntimeConfig, SamplingConfig};
pub use decision::{decide, Decision};
pub use hardware::{Relay, SensorDriver, SensorError, StatusCode, StatusSignal};
pub use thermostat::ThermostatEngine;
pub use topics::*;
pub use types::{
    ControllerStatus, SensorHealth, SensorReading, TemperatureDisplayUnits, ThermostatMode,
    ThermostatState,
};
