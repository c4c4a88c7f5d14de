use crate::characteristics::CharacteristicId;

pub const TOPIC_STATUS: &str = "thermostat/status";
pub const TOPIC_ACCESSORY: &str = "thermostat/accessory";
pub const TOPIC_CMD_IDENTIFY: &str = "thermostat/cmnd/identify";
pub const TOPIC_CHARACTERISTIC_PREFIX: &str = "thermostat/characteristic";

const SET_SUFFIX: &str = "/set";

pub fn state_topic(id: CharacteristicId) -> String {
    format!("{TOPIC_CHARACTERISTIC_PREFIX}/{}", id.as_str())
}

pub fn set_topic(id: CharacteristicId) -> String {
    format!("{}{SET_SUFFIX}", state_topic(id))
}

pub fn set_topics() -> impl Iterator<Item = (CharacteristicId, String)> {
    CharacteristicId::ALL
        .into_iter()
        .filter(|id| id.remote_writable())
        .map(|id| (id, set_topic(id)))
}

pub fn parse_set_topic(topic: &str) -> Option<CharacteristicId> {
    topic
        .strip_prefix(TOPIC_CHARACTERISTIC_PREFIX)?
        .strip_prefix('/')?
        .strip_suffix(SET_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_topics_round_trip() {
        for (id, topic) in set_topics() {
            assert_eq!(parse_set_topic(&topic), Some(id));
        }
    }

    #[test]
    fn only_writable_characteristics_get_set_topics() {
        let ids: Vec<_> = set_topics().map(|(id, _)| id).collect();
        assert_eq!(
            ids,
            vec![
                CharacteristicId::TargetTemperature,
                CharacteristicId::TargetHeatingCoolingState,
                CharacteristicId::TemperatureDisplayUnits,
            ]
        );
    }

    #[test]
    fn state_topics_are_not_set_topics() {
        let topic = state_topic(CharacteristicId::TargetTemperature);
        assert_eq!(topic, "thermostat/characteristic/target_temperature");
        assert_eq!(parse_set_topic(&topic), None);
        assert_eq!(parse_set_topic("thermostat/characteristic/bogus/set"), None);
    }
}
