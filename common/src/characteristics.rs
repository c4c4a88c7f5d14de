// Every value lives behind one lock. Write callbacks and observers are run
// after that lock is released, so a callback may read or set other
// characteristics without deadlocking.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use serde::Serialize;
use thiserror::Error;

use crate::types::{TemperatureDisplayUnits, ThermostatMode, ThermostatState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacteristicId {
    CurrentTemperature,
    TargetTemperature,
    CurrentHeatingCoolingState,
    TargetHeatingCoolingState,
    CurrentRelativeHumidity,
    TemperatureDisplayUnits,
}

impl CharacteristicId {
    pub const ALL: [Self; 6] = [
        Self::CurrentTemperature,
        Self::TargetTemperature,
        Self::CurrentHeatingCoolingState,
        Self::TargetHeatingCoolingState,
        Self::CurrentRelativeHumidity,
        Self::TemperatureDisplayUnits,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentTemperature => "current_temperature",
            Self::TargetTemperature => "target_temperature",
            Self::CurrentHeatingCoolingState => "current_heating_cooling_state",
            Self::TargetHeatingCoolingState => "target_heating_cooling_state",
            Self::CurrentRelativeHumidity => "current_relative_humidity",
            Self::TemperatureDisplayUnits => "temperature_display_units",
        }
    }

    pub fn format(self) -> ValueFormat {
        match self {
            Self::CurrentTemperature | Self::TargetTemperature | Self::CurrentRelativeHumidity => {
                ValueFormat::Float
            }
            Self::CurrentHeatingCoolingState
            | Self::TargetHeatingCoolingState
            | Self::TemperatureDisplayUnits => ValueFormat::UInt8,
        }
    }

    pub fn remote_writable(self) -> bool {
        matches!(
            self,
            Self::TargetTemperature | Self::TargetHeatingCoolingState | Self::TemperatureDisplayUnits
        )
    }

    pub fn parse_value(self, raw: &str) -> Result<CharacteristicValue, StoreError> {
        let raw = raw.trim();
        let invalid = || StoreError::InvalidValue {
            id: self,
            value: raw.to_string(),
        };

        match self.format() {
            ValueFormat::Float => raw
                .parse::<f32>()
                .map(CharacteristicValue::Float)
                .map_err(|_| invalid()),
            ValueFormat::UInt8 => raw
                .parse::<u8>()
                .map(CharacteristicValue::UInt8)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CharacteristicId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| StoreError::UnknownCharacteristic(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Float,
    UInt8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    Float(f32),
    UInt8(u8),
}

impl fmt::Display for CharacteristicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write!(f, "{value}"),
            Self::UInt8(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("unknown characteristic '{0}'")]
    UnknownCharacteristic(String),
    #[error("characteristic {0} is read-only")]
    ReadOnly(CharacteristicId),
    #[error("invalid value '{value}' for characteristic {id}")]
    InvalidValue { id: CharacteristicId, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Notification {
    pub id: CharacteristicId,
    pub value: CharacteristicValue,
}

pub type WriteCallback = Arc<dyn Fn(CharacteristicId, CharacteristicValue) + Send + Sync>;
pub type Observer = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Values {
    current_temperature: f32,
    target_temperature: f32,
    current_state: ThermostatState,
    target_mode: ThermostatMode,
    current_humidity: f32,
    display_units: TemperatureDisplayUnits,
}

impl Default for Values {
    fn default() -> Self {
        Self {
            current_temperature: 17.0,
            target_temperature: 22.0,
            current_state: ThermostatState::Off,
            target_mode: ThermostatMode::Off,
            current_humidity: 50.0,
            display_units: TemperatureDisplayUnits::Celsius,
        }
    }
}

impl Values {
    fn read(&self, id: CharacteristicId) -> CharacteristicValue {
        match id {
            CharacteristicId::CurrentTemperature => {
                CharacteristicValue::Float(self.current_temperature)
            }
            CharacteristicId::TargetTemperature => CharacteristicValue::Float(self.target_temperature),
            CharacteristicId::CurrentHeatingCoolingState => {
                CharacteristicValue::UInt8(self.current_state.as_u8())
            }
            CharacteristicId::TargetHeatingCoolingState => {
                CharacteristicValue::UInt8(self.target_mode.as_u8())
            }
            CharacteristicId::CurrentRelativeHumidity => {
                CharacteristicValue::Float(self.current_humidity)
            }
            CharacteristicId::TemperatureDisplayUnits => {
                CharacteristicValue::UInt8(self.display_units.as_u8())
            }
        }
    }

    fn assign(&mut self, id: CharacteristicId, value: CharacteristicValue) -> Result<(), StoreError> {
        let invalid = || StoreError::InvalidValue {
            id,
            value: value.to_string(),
        };

        match (id, value) {
            (CharacteristicId::CurrentTemperature, CharacteristicValue::Float(v)) => {
                self.current_temperature = v
            }
            (CharacteristicId::TargetTemperature, CharacteristicValue::Float(v)) => {
                self.target_temperature = v
            }
            (CharacteristicId::CurrentRelativeHumidity, CharacteristicValue::Float(v)) => {
                self.current_humidity = v
            }
            (CharacteristicId::CurrentHeatingCoolingState, CharacteristicValue::UInt8(v)) => {
                self.current_state = ThermostatState::from_u8(v).ok_or_else(invalid)?
            }
            (CharacteristicId::TargetHeatingCoolingState, CharacteristicValue::UInt8(v)) => {
                self.target_mode = ThermostatMode::from_u8(v).ok_or_else(invalid)?
            }
            (CharacteristicId::TemperatureDisplayUnits, CharacteristicValue::UInt8(v)) => {
                self.display_units = TemperatureDisplayUnits::from_u8(v).ok_or_else(invalid)?
            }
            _ => return Err(invalid()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CharacteristicSnapshot {
    #[serde(rename = "currentTemperature")]
    pub current_temperature: f32,
    #[serde(rename = "targetTemperature")]
    pub target_temperature: f32,
    #[serde(rename = "currentHeatingCoolingState")]
    pub current_state: ThermostatState,
    #[serde(rename = "targetHeatingCoolingState")]
    pub target_mode: ThermostatMode,
    #[serde(rename = "currentRelativeHumidity")]
    pub current_humidity: f32,
    #[serde(rename = "temperatureDisplayUnits")]
    pub display_units: TemperatureDisplayUnits,
}

#[derive(Default)]
pub struct CharacteristicStore {
    values: RwLock<Values>,
    write_callbacks: Mutex<HashMap<CharacteristicId, Vec<WriteCallback>>>,
    observers: Mutex<Vec<Observer>>,
}

impl fmt::Debug for CharacteristicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicStore")
            .field("values", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl CharacteristicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CharacteristicId) -> CharacteristicValue {
        self.read_values().read(id)
    }

    pub fn snapshot(&self) -> CharacteristicSnapshot {
        let values = self.read_values();
        CharacteristicSnapshot {
            current_temperature: values.current_temperature,
            target_temperature: values.target_temperature,
            current_state: values.current_state,
            target_mode: values.target_mode,
            current_humidity: values.current_humidity,
            display_units: values.display_units,
        }
    }

    pub fn current_temperature(&self) -> f32 {
        self.read_values().current_temperature
    }

    pub fn target_temperature(&self) -> f32 {
        self.read_values().target_temperature
    }

    pub fn current_state(&self) -> ThermostatState {
        self.read_values().current_state
    }

    pub fn target_mode(&self) -> ThermostatMode {
        self.read_values().target_mode
    }

    pub fn current_humidity(&self) -> f32 {
        self.read_values().current_humidity
    }

    // Local write from the core. Always notifies, even when the value is
    // unchanged.
    pub fn set(&self, id: CharacteristicId, value: CharacteristicValue) -> Result<(), StoreError> {
        self.write_values().assign(id, value)?;
        self.notify(id, value);
        Ok(())
    }

    pub fn set_current_temperature(&self, temperature: f32) {
        self.write_values().current_temperature = temperature;
        self.notify(
            CharacteristicId::CurrentTemperature,
            CharacteristicValue::Float(temperature),
        );
    }

    pub fn set_current_humidity(&self, humidity: f32) {
        self.write_values().current_humidity = humidity;
        self.notify(
            CharacteristicId::CurrentRelativeHumidity,
            CharacteristicValue::Float(humidity),
        );
    }

    pub fn set_current_state(&self, state: ThermostatState) {
        self.write_values().current_state = state;
        self.notify(
            CharacteristicId::CurrentHeatingCoolingState,
            CharacteristicValue::UInt8(state.as_u8()),
        );
    }

    pub fn write(&self, id: CharacteristicId, value: CharacteristicValue) -> Result<(), StoreError> {
        if !id.remote_writable() {
            return Err(StoreError::ReadOnly(id));
        }

        self.set(id, value)?;

        let callbacks = self
            .write_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_default();
        for callback in callbacks {
            callback(id, value);
        }
        Ok(())
    }

    pub fn on_write(&self, id: CharacteristicId, callback: WriteCallback) {
        self.write_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .push(callback);
    }

    // Registers a change observer. Observers run synchronously on the
    // writer's thread and must not block.
    pub fn observe(&self, observer: Observer) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn notify(&self, id: CharacteristicId, value: CharacteristicValue) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let notification = Notification { id, value };
        for observer in observers {
            observer(&notification);
        }
    }

    fn read_values(&self) -> std::sync::RwLockReadGuard<'_, Values> {
        self.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_values(&self) -> std::sync::RwLockWriteGuard<'_, Values> {
        self.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}
