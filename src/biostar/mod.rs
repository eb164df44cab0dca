pub mod client;
pub mod error;
pub mod legacy;
pub mod status;

use std::collections::BTreeMap;
use std::fmt;

/// A decoded sensor value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Float(f64),
    Int(i64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or_else(|| Value::Text(n.to_string())),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            other => Value::Text(other.to_string()),
        }
    }
}

/// One value together with the unit the device reported for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub value: Value,
    pub unit: Option<String>,
}

impl Reading {
    pub fn new(value: Value, unit: Option<&str>) -> Self {
        Self {
            value,
            unit: unit.map(String::from),
        }
    }

    pub fn category(&self) -> Option<UnitCategory> {
        self.unit.as_deref().and_then(UnitCategory::from_unit)
    }
}

/// Semantic family of a unit string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCategory {
    Temperature,
    Percentage,
    Duration,
}

impl UnitCategory {
    pub fn from_unit(unit: &str) -> Option<Self> {
        match unit {
            "°C" => Some(Self::Temperature),
            "%" => Some(Self::Percentage),
            "h" | "d" => Some(Self::Duration),
            _ => None,
        }
    }
}

/// Readings from one fetch cycle, keyed by sensor name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingSet {
    readings: BTreeMap<String, Reading>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reading, replacing any previous one under the same key.
    pub fn insert(&mut self, key: impl Into<String>, reading: Reading) {
        self.readings.insert(key.into(), reading);
    }

    /// Add every reading from `other` whose key is not already present.
    /// Returns how many readings were added.
    pub fn merge_missing(&mut self, other: ReadingSet) -> usize {
        let mut added = 0;
        for (key, reading) in other.readings {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.readings.entry(key) {
                slot.insert(reading);
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.readings.get(key)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reading)> {
        self.readings.iter().map(|(k, r)| (k.as_str(), r))
    }
}

/// Device metadata reported by the status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub model: String,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
}

/// Result of one refresh cycle, ready to publish to MQTT.
#[derive(Debug)]
pub enum PollOutcome {
    Readings {
        readings: ReadingSet,
        device: Option<DeviceIdentity>,
    },
    Unavailable,
}
