use serde::{Deserialize, Serialize};
use thiserror::Error;

// DHT22 cannot be sampled faster than once every two seconds.
const MIN_POLL_INTERVAL_MS: u64 = 2_000;
const MAX_INTERVAL_MS: u64 = 3_600_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),
    #[error("malformed runtime config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub poll_interval_ms: u64,
    pub post_read_delay_ms: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            post_read_delay_ms: 20_000,
        }
    }
}

impl SamplingConfig {
    pub fn sanitize(&mut self) {
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_INTERVAL_MS);
        self.post_read_delay_ms = self.post_read_delay_ms.min(MAX_INTERVAL_MS);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorKind {
    Dht11,
    Dht22,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub kind: SensorKind,
    pub gpio: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            kind: SensorKind::Dht22,
            gpio: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub relay_gpio: u8,
    pub led_gpio: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            relay_gpio: 12,
            led_gpio: 13,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    pub name: String,
    pub serial_prefix: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware_revision: String,
    pub setup_code: String,
    pub mac: Option<String>,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            name: "Sonoff Thermostat".to_string(),
            serial_prefix: "SonoffTH".to_string(),
            manufacturer: "iTEAD".to_string(),
            model: "Sonoff TH".to_string(),
            firmware_revision: "1.0".to_string(),
            setup_code: "021-82-017".to_string(),
            mac: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sampling: SamplingConfig,
    pub sensor: SensorConfig,
    pub hardware: HardwareConfig,
    pub accessory: AccessoryConfig,
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.sampling.sanitize();
    }
}

pub fn parse_mac(raw: &str) -> Result<[u8; 6], ConfigError> {
    let invalid = || ConfigError::InvalidMac(raw.to_string());
    let mut mac = [0u8; 6];
    let mut parts = raw.trim().split([':', '-']);

    for octet in mac.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.len() != 2 {
            return Err(invalid());
        }
        *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
    }

    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_board_wiring() {
        let config = RuntimeConfig::default();
        assert_eq!(config.sampling.poll_interval_ms, 10_000);
        assert_eq!(config.sampling.post_read_delay_ms, 20_000);
        assert_eq!(config.sensor.kind, SensorKind::Dht22);
        assert_eq!(config.sensor.gpio, 14);
        assert_eq!(config.hardware.relay_gpio, 12);
        assert_eq!(config.hardware.led_gpio, 13);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = RuntimeConfig::from_json(
            br#"{"sensor": {"gpio": 4}, "accessory": {"mac": "18:FE:34:A1:B2:C3"}}"#,
        )
        .unwrap();

        assert_eq!(config.sensor.gpio, 4);
        assert_eq!(config.sensor.kind, SensorKind::Dht22);
        assert_eq!(config.accessory.model, "Sonoff TH");
        assert_eq!(config.accessory.mac.as_deref(), Some("18:FE:34:A1:B2:C3"));
        assert_eq!(config.network.mqtt_port, 1883);
    }

    #[test]
    fn older_configs_with_button_pin_still_load() {
        let config = RuntimeConfig::from_json(
            br#"{"hardware": {"relay_gpio": 5, "led_gpio": 13, "button_gpio": 0}}"#,
        )
        .unwrap();

        assert_eq!(
            config.hardware,
            HardwareConfig {
                relay_gpio: 5,
                led_gpio: 13,
            }
        );
    }

    #[test]
    fn sanitize_enforces_sensor_minimum_period() {
        let mut sampling = SamplingConfig {
            poll_interval_ms: 100,
            post_read_delay_ms: u64::MAX,
        };
        sampling.sanitize();

        assert_eq!(sampling.poll_interval_ms, 2_000);
        assert_eq!(sampling.post_read_delay_ms, 3_600_000);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            RuntimeConfig::from_json(b"{\"sampling\": 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn parses_mac_addresses() {
        assert_eq!(
            parse_mac("18:fe:34:A1:B2:C3").unwrap(),
            [0x18, 0xFE, 0x34, 0xA1, 0xB2, 0xC3]
        );
        assert_eq!(
            parse_mac("18-FE-34-A1-B2-C3").unwrap(),
            [0x18, 0xFE, 0x34, 0xA1, 0xB2, 0xC3]
        );
        for bad in ["", "18:FE:34", "18:FE:34:A1:B2:C3:00", "18:FE:34:A1:B2:G3", "1:FE:34:A1:B2:C3"] {
            assert!(parse_mac(bad).is_err(), "{bad} should be rejected");
        }
    }
}
