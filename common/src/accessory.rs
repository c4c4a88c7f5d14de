use serde::Serialize;

use crate::config::AccessoryConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessoryInfo {
    pub name: String,
    #[serde(rename = "serialNumber")]
    pub serial_number: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "firmwareRevision")]
    pub firmware_revision: String,
}

impl AccessoryInfo {
    pub fn for_device(config: &AccessoryConfig, mac: Option<[u8; 6]>) -> Self {
        let (name, serial_number) = match mac {
            Some(mac) => {
                let id = format!(
                    "{} {:02X}{:02X}{:02X}",
                    config.serial_prefix, mac[3], mac[4], mac[5]
                );
                (id.clone(), id)
            }
            None => (
                config.name.clone(),
                format!("{} N/A", config.serial_prefix),
            ),
        };

        Self {
            name,
            serial_number,
            manufacturer: config.manufacturer.clone(),
            model: config.model.clone(),
            firmware_revision: config.firmware_revision.clone(),
        }
    }
}
