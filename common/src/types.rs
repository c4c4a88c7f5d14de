use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    #[default]
    Off,
    Heat,
    Cool,
}

impl ThermostatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heat => "HEAT",
            Self::Cool => "COOL",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heat => 1,
            Self::Cool => 2,
        }
    }

    // `3` (auto) is deliberately not accepted.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermostatState {
    #[default]
    Off,
    Heating,
    Cooling,
}

impl ThermostatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Heating => "HEATING",
            Self::Cooling => "COOLING",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heating => 1,
            Self::Cooling => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Heating),
            2 => Some(Self::Cooling),
            _ => None,
        }
    }

    pub fn is_energized(self) -> bool {
        !matches!(self, Self::Off)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TemperatureDisplayUnits {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureDisplayUnits {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Celsius => 0,
            Self::Fahrenheit => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Celsius),
            1 => Some(Self::Fahrenheit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature_c: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorHealth {
    #[serde(rename = "lastReadingAt")]
    pub last_reading_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: f32,
    #[serde(rename = "currentHumidity")]
    pub current_humidity: f32,
    #[serde(rename = "targetTemp")]
    pub target_temp: f32,
    pub mode: &'static str,
    pub state: &'static str,
    #[serde(rename = "relayOn")]
    pub relay_on: bool,
    #[serde(rename = "displayUnits")]
    pub display_units: TemperatureDisplayUnits,
    pub sensor: SensorHealth,
}
