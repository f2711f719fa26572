use serde_json::{Map, Value, json};

use crate::models::DeviceModel;

use super::Topics;

/// Builds the retained discovery document describing every observable and
/// controllable component of the panel, keyed the way broker-side consumers
/// (Home Assistant style) expect it.
pub fn discovery_document(model: DeviceModel, topics: &Topics) -> Value {
    let id = topics.client_id();
    let profile = model.profile();
    let mut components = Map::new();

    components.insert(
        format!("{id}_temp"),
        json!({
            "p": "sensor",
            "name": "Temperature",
            "state_topic": topics.temperature(),
            "device_class": "temperature",
            "unit_of_measurement": "°C",
            "unique_id": format!("{id}_temp"),
        }),
    );

    components.insert(
        format!("{id}_hum"),
        json!({
            "p": "sensor",
            "name": "Humidity",
            "state_topic": topics.humidity(),
            "device_class": "humidity",
            "unit_of_measurement": "%",
            "unique_id": format!("{id}_hum"),
        }),
    );

    components.insert(
        format!("{id}_lux"),
        json!({
            "p": "sensor",
            "name": "Light",
            "state_topic": topics.lux(),
            "device_class": "illuminance",
            "unit_of_measurement": "lx",
            "unique_id": format!("{id}_lux"),
        }),
    );

    if profile.has_proximity_sensor {
        components.insert(
            format!("{id}_proximity"),
            json!({
                "p": "sensor",
                "name": "Proximity",
                "state_topic": topics.proximity(),
                "device_class": "distance",
                "unit_of_measurement": "cm",
                "unique_id": format!("{id}_proximity"),
            }),
        );
    }

    for num in 0..profile.relays {
        let suffix = relay_suffix(num);
        components.insert(
            format!("{id}_relay{suffix}"),
            json!({
                "p": "switch",
                "name": relay_name("Relay", num),
                "state_topic": topics.relay_state(num),
                "command_topic": topics.relay_command(num),
                "device_class": "outlet",
                "unique_id": format!("{id}_relay{suffix}"),
            }),
        );

        // The wall switch input paired with each relay, exposed as a
        // press/release button on its own state topic.
        components.insert(
            format!("{id}_switch{suffix}"),
            json!({
                "p": "button",
                "name": relay_name("Switch", num),
                "command_topic": topics.switch_state(num),
                "payload_press": "PRESS",
                "payload_release": "RELEASE",
                "value_template": "{{ value }}",
                "unique_id": format!("{id}_switch{suffix}"),
            }),
        );
    }

    components.insert(
        format!("{id}_sleep"),
        json!({
            "p": "button",
            "name": "Sleep",
            "command_topic": topics.sleep(),
            "unique_id": format!("{id}_sleep"),
        }),
    );

    components.insert(
        format!("{id}_wake"),
        json!({
            "p": "button",
            "name": "Wake",
            "command_topic": topics.wake(),
            "unique_id": format!("{id}_wake"),
        }),
    );

    components.insert(
        format!("{id}_refresh"),
        json!({
            "p": "button",
            "name": "Refresh",
            "command_topic": topics.refresh(),
            "device_class": "restart",
            "unique_id": format!("{id}_refresh"),
        }),
    );

    components.insert(
        format!("{id}_reboot"),
        json!({
            "p": "button",
            "name": "Reboot",
            "command_topic": topics.reboot(),
            "device_class": "restart",
            "unique_id": format!("{id}_reboot"),
        }),
    );

    components.insert(
        format!("{id}_sleeping"),
        json!({
            "p": "binary_sensor",
            "name": "Sleeping",
            "state_topic": topics.sleeping(),
            "unique_id": format!("{id}_sleeping"),
        }),
    );

    json!({
        "dev": {
            "ids": id,
            "name": "Lumipanel Wall Display",
            "mf": "Shelly",
            "mdl": profile.name,
        },
        "o": {
            "name": env!("CARGO_PKG_NAME"),
            "url": "https://github.com/lumipanel/lumipanel",
        },
        "cmps": components,
        "state_topic": topics.status(),
    })
}

pub fn relay_suffix(num: usize) -> String {
    if num > 0 {
        format!("_{num}")
    } else {
        String::new()
    }
}

fn relay_name(base: &str, num: usize) -> String {
    if num > 0 {
        format!("{base} {num}")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(model: DeviceModel) -> Map<String, Value> {
        let topics = Topics::new("lumipanel-test");
        discovery_document(model, &topics)["cmps"]
            .as_object()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_proximity_component_follows_model() {
        assert!(components(DeviceModel::Pegasus).contains_key("lumipanel-test_proximity"));
        assert!(!components(DeviceModel::Stargate).contains_key("lumipanel-test_proximity"));
    }

    #[test]
    fn test_relay_components_per_model() {
        let cmps = components(DeviceModel::Pegasus);
        assert!(cmps.contains_key("lumipanel-test_relay"));
        assert!(cmps.contains_key("lumipanel-test_relay_1"));

        let cmps = components(DeviceModel::Atlantis);
        assert!(cmps.contains_key("lumipanel-test_relay"));
        assert!(!cmps.contains_key("lumipanel-test_relay_1"));
    }

    #[test]
    fn test_switch_button_next_to_each_relay() {
        let cmps = components(DeviceModel::Pegasus);
        assert!(cmps.contains_key("lumipanel-test_switch"));
        assert!(cmps.contains_key("lumipanel-test_switch_1"));

        let switch = &cmps["lumipanel-test_switch_1"];
        assert_eq!(switch["p"], json!("button"));
        assert_eq!(switch["payload_press"], json!("PRESS"));
        assert_eq!(switch["payload_release"], json!("RELEASE"));
        assert_eq!(
            switch["command_topic"],
            json!("lumipanel/lumipanel-test/switch_state_1")
        );

        assert!(!components(DeviceModel::Atlantis).contains_key("lumipanel-test_switch_1"));
    }

    #[test]
    fn test_relay_command_topics_are_wired() {
        let topics = Topics::new("lumipanel-test");
        let doc = discovery_document(DeviceModel::Pegasus, &topics);

        assert_eq!(
            doc["cmps"]["lumipanel-test_relay_1"]["command_topic"],
            json!("lumipanel/lumipanel-test/relay_command_1")
        );
    }

    #[test]
    fn test_device_block_and_status_topic() {
        let topics = Topics::new("lumipanel-test");
        let doc = discovery_document(DeviceModel::Blake, &topics);

        assert_eq!(doc["dev"]["ids"], json!("lumipanel-test"));
        assert_eq!(doc["dev"]["mdl"], json!("Blake"));
        assert_eq!(doc["state_topic"], json!("lumipanel/lumipanel-test/status"));
    }
}
