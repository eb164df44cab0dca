//! Normalizer for the JSON `status.cgi` document exposed by newer firmware.

use serde::Deserialize;
use serde_json::Value as Json;

use super::{DeviceIdentity, Reading, ReadingSet, Value};

pub const KEY_FIRMWARE: &str = "_Firmware version";
pub const KEY_SERIAL: &str = "_Serial number";
pub const KEY_MODEL: &str = "_Model";
pub const KEY_LANGUAGE: &str = "_Language";
pub const KEY_LAST_UPDATE: &str = "_Last update";

const DEFAULT_MODEL: &str = "Biostar";

// Serde structs for the status.cgi document. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusDocument {
    temp: Option<Json>,
    ext_temp: Option<Json>,
    co2: Option<Json>,
    fumes: Option<Json>,
    fuel: Option<Json>,
    cleaning_in: Option<Json>,
    state: Option<Json>,
    mode: Option<Json>,
    name: Option<Json>,
    timestamp: Option<Json>,
    meta: Option<Meta>,
    heat_circ: Option<Vec<HeatingCircuit>>,
    water_circ: Option<Vec<WaterCircuit>>,
    error: Option<Vec<Json>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Meta {
    sw_version: Option<Json>,
    sn: Option<Json>,
    typ: Option<Json>,
    language: Option<Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeatingCircuit {
    name: Option<Json>,
    day_temp: Option<Json>,
    night_temp: Option<Json>,
    mode: Option<Json>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WaterCircuit {
    name: Option<Json>,
    temp: Option<Json>,
    mode: Option<Json>,
}

/// Flattened status document.
#[derive(Debug, Default, PartialEq)]
pub struct StatusData {
    pub readings: ReadingSet,
    /// Present only when the document carried a `meta` block.
    pub device: Option<DeviceIdentity>,
}

/// Parse a `status.cgi` body into flat readings.
pub fn parse_status(body: &[u8]) -> Result<StatusData, serde_json::Error> {
    // Only a JSON object is accepted; serde would otherwise map arrays positionally.
    let object: serde_json::Map<String, Json> = serde_json::from_slice(body)?;
    let doc = StatusDocument::deserialize(Json::Object(object))?;
    Ok(flatten(&doc))
}

fn put(set: &mut ReadingSet, key: &str, field: &Option<Json>, unit: Option<&str>) {
    if let Some(json) = field {
        set.insert(key, Reading::new(Value::from(json), unit));
    }
}

/// Render a JSON scalar as plain text: strings without quotes, the rest as JSON.
fn text_of(json: &Json) -> String {
    match json {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Circuits are labelled by their name, or by position when unnamed.
fn circuit_label(name: &Option<Json>, index: usize) -> String {
    name.as_ref()
        .map(text_of)
        .unwrap_or_else(|| index.to_string())
}

fn flatten(doc: &StatusDocument) -> StatusData {
    let mut readings = ReadingSet::new();

    put(&mut readings, "_Boiler temperature", &doc.temp, Some("°C"));
    put(&mut readings, "_Outdoor temperature", &doc.ext_temp, Some("°C"));
    put(&mut readings, "_CO2", &doc.co2, Some("%"));
    put(&mut readings, "_Flue gas", &doc.fumes, Some("%"));
    put(&mut readings, "_Fuel level", &doc.fuel, Some("%"));
    put(&mut readings, "_Cleaning in", &doc.cleaning_in, Some("h"));
    put(&mut readings, "_State", &doc.state, None);
    put(&mut readings, "_Mode", &doc.mode, None);
    put(&mut readings, "_Name", &doc.name, None);
    put(&mut readings, KEY_LAST_UPDATE, &doc.timestamp, None);

    let device = doc.meta.as_ref().map(|meta| {
        put(&mut readings, KEY_FIRMWARE, &meta.sw_version, None);
        put(&mut readings, KEY_SERIAL, &meta.sn, None);
        put(&mut readings, KEY_MODEL, &meta.typ, None);
        put(&mut readings, KEY_LANGUAGE, &meta.language, None);

        DeviceIdentity {
            model: meta.typ.as_ref().map(text_of).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            firmware_version: meta.sw_version.as_ref().map(text_of),
            serial_number: meta.sn.as_ref().map(text_of),
        }
    });

    for (i, circuit) in doc.heat_circ.iter().flatten().enumerate() {
        let prefix = format!("_Heating circuit {}", circuit_label(&circuit.name, i));
        let day = format!("{prefix} - Day temperature");
        put(&mut readings, &day, &circuit.day_temp, Some("°C"));
        let night = format!("{prefix} - Night temperature");
        put(&mut readings, &night, &circuit.night_temp, Some("°C"));
        put(&mut readings, &format!("{prefix} - Mode"), &circuit.mode, None);
    }

    for (i, circuit) in doc.water_circ.iter().flatten().enumerate() {
        let prefix = format!("_Hot water {}", circuit_label(&circuit.name, i));
        put(&mut readings, &format!("{prefix} - Temperature"), &circuit.temp, Some("°C"));
        put(&mut readings, &format!("{prefix} - Mode"), &circuit.mode, None);
    }

    if let Some(errors) = doc.error.as_ref().filter(|e| !e.is_empty()) {
        readings.insert(
            "_Active errors",
            Reading::new(Value::Int(errors.len() as i64), None),
        );
        for (i, err) in errors.iter().enumerate() {
            readings.insert(format!("_Error {i}"), Reading::new(Value::Text(text_of(err)), None));
        }
    }

    StatusData { readings, device }
}
