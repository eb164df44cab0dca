//! Home Assistant MQTT discovery payloads for Biostar readings.
//!
//! Boolean readings become `binary_sensor` entities, everything else a
//! `sensor`. The unit category decides device and state class.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::biostar::status::{KEY_FIRMWARE, KEY_LANGUAGE, KEY_LAST_UPDATE, KEY_MODEL, KEY_SERIAL};
use crate::biostar::{DeviceIdentity, Reading, UnitCategory, Value};
use crate::config::Config;

const MANUFACTURER: &str = "Guntamatic";
const DEFAULT_MODEL: &str = "Biostar";
const DIAGNOSTIC_KEYS: [&str; 5] = [
    KEY_FIRMWARE,
    KEY_SERIAL,
    KEY_MODEL,
    KEY_LANGUAGE,
    KEY_LAST_UPDATE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Sensor,
    BinarySensor,
}

impl Component {
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Component::BinarySensor,
            _ => Component::Sensor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Sensor => "sensor",
            Component::BinarySensor => "binary_sensor",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Discovery {
    pub name: String,
    pub object_id: String,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub device: Device,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_off: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub identifiers: Vec<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl Device {
    pub fn new(name: &str, identity: Option<&DeviceIdentity>) -> Self {
        Self {
            identifiers: vec!["biostar".to_string()],
            name: name.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: identity
                .map(|i| i.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            sw_version: identity.and_then(|i| i.firmware_version.clone()),
            serial_number: identity.and_then(|i| i.serial_number.clone()),
        }
    }
}

/// Assigns every sensor key a topic segment that no other key uses.
///
/// Keys that fold to the same slug get a numeric suffix in the order they
/// are first seen. Assignments live as long as the registry.
#[derive(Debug, Default)]
pub struct SlugRegistry {
    by_key: HashMap<String, String>,
    taken: HashSet<String>,
}

impl SlugRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slug for `key`, or `None` when the key has no usable characters.
    pub fn slug_for(&mut self, key: &str) -> Option<&str> {
        if !self.by_key.contains_key(key) {
            let base = slugify(key);
            if base.is_empty() {
                return None;
            }
            let mut slug = base.clone();
            let mut n = 2;
            while self.taken.contains(&slug) {
                slug = format!("{base}_{n}");
                n += 1;
            }
            self.taken.insert(slug.clone());
            self.by_key.insert(key.to_string(), slug);
        }
        self.by_key.get(key).map(String::as_str)
    }
}

/// Build the discovery topic and payload for one reading published under `slug`.
pub fn discovery(
    config: &Config,
    key: &str,
    slug: &str,
    reading: &Reading,
    device: &Device,
) -> (String, Discovery) {
    let component = Component::for_value(&reading.value);
    let mut payload = Discovery {
        name: display_name(key).to_string(),
        object_id: format!("biostar_{slug}"),
        unique_id: format!("biostar_{slug}"),
        state_topic: config.state_topic(slug),
        availability_topic: config.availability_topic(),
        device: device.clone(),
        device_class: None,
        unit_of_measurement: None,
        state_class: None,
        entity_category: DIAGNOSTIC_KEYS.contains(&key).then_some("diagnostic"),
        payload_on: None,
        payload_off: None,
    };

    match component {
        Component::BinarySensor => {
            payload.payload_on = Some("ON");
            payload.payload_off = Some("OFF");
        }
        Component::Sensor => {
            if let Some(category) = reading.category() {
                payload.device_class = match category {
                    UnitCategory::Temperature => Some("temperature"),
                    UnitCategory::Percentage => None,
                    UnitCategory::Duration => Some("duration"),
                };
                payload.unit_of_measurement = reading.unit.clone();
                payload.state_class = Some("measurement");
            }
        }
    }

    (config.discovery_topic(component.as_str(), slug), payload)
}

/// MQTT payload for a state topic.
pub fn state_payload(value: &Value) -> String {
    match value {
        Value::Bool(true) => "ON".to_string(),
        Value::Bool(false) => "OFF".to_string(),
        other => other.to_string(),
    }
}

/// Status-endpoint keys carry a leading `_` that is not shown.
pub fn display_name(key: &str) -> &str {
    key.trim_start_matches('_')
}

/// Convert a sensor key into a topic/id segment.
/// "_Température chaudière" → "temperature_chaudiere"
pub fn slugify(key: &str) -> String {
    let mut slug = String::with_capacity(key.len());
    for c in key.to_lowercase().chars() {
        if let Some(folded) = fold_latin1(c) {
            slug.push_str(folded);
        } else if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

fn fold_latin1(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'œ' => "oe",
        'ß' => "ss",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        _ => return None,
    };
    Some(folded)
}
