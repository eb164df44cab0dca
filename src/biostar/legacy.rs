//! Decoder for the semicolon-delimited `daqdesc.cgi` / `daqdata.cgi` payloads.
//!
//! The descriptor payload has one `name;unit` pair per line and the values
//! payload one raw value per line. Lines are paired by position.

use encoding_rs::WINDOWS_1252;

use super::{Reading, ReadingSet, UnitCategory, Value};

/// Placeholder field names the controller emits for unused slots, lowercased.
const RESERVED_KEYS: [&str; 3] = ["reserved", "réservé", "reserviert"];

const ON_TOKENS: [&str; 3] = ["AN", "ON", "MARCHE"];
const OFF_TOKENS: [&str; 3] = ["AUS", "OFF", "ARRÊT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Descriptor line did not split into exactly `name;unit`.
    Malformed,
    /// Descriptor names an unused slot.
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// Zero-based line index in both payloads.
    pub line: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Default, PartialEq)]
pub struct LegacyDecode {
    pub readings: ReadingSet,
    pub skipped: Vec<SkippedLine>,
}

/// The controller writes Western-European text in Windows-1252, not UTF-8.
pub fn decode_windows_1252(bytes: &[u8]) -> String {
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Split a payload into lines, dropping the trailing terminator element.
fn payload_lines(payload: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = payload.split('\n').collect();
    lines.pop();
    lines
}

/// Pair descriptor and value lines into readings.
///
/// Only the overlapping prefix of the two payloads is decoded; a length
/// mismatch is not an error.
pub fn decode(descriptors: &str, values: &str) -> LegacyDecode {
    let descriptors = payload_lines(descriptors);
    let values = payload_lines(values);

    let mut out = LegacyDecode::default();

    for (line, (descriptor, raw)) in descriptors.iter().zip(values.iter()).enumerate() {
        let mut fields = descriptor.split(';');
        let (Some(key), Some(unit), None) = (fields.next(), fields.next(), fields.next()) else {
            out.skipped.push(SkippedLine {
                line,
                reason: SkipReason::Malformed,
            });
            continue;
        };

        if is_reserved(key) {
            out.skipped.push(SkippedLine {
                line,
                reason: SkipReason::Reserved,
            });
            continue;
        }

        let unit = Some(unit.trim()).filter(|u| !u.is_empty());
        let value = classify(raw.trim(), unit);
        out.readings.insert(key, Reading::new(value, unit));
    }

    out
}

pub fn is_reserved(key: &str) -> bool {
    let lower = key.to_lowercase();
    RESERVED_KEYS.contains(&lower.as_str())
}

/// Infer a typed value from a raw token and its unit. First matching rule wins.
pub fn classify(raw: &str, unit: Option<&str>) -> Value {
    if ON_TOKENS.contains(&raw) {
        return Value::Bool(true);
    }
    if OFF_TOKENS.contains(&raw) {
        return Value::Bool(false);
    }

    match unit.and_then(UnitCategory::from_unit) {
        Some(UnitCategory::Temperature | UnitCategory::Percentage) => raw
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or_else(|_| Value::Text(raw.to_string())),
        Some(UnitCategory::Duration) => {
            truncate(raw).map(Value::Int).unwrap_or_else(|| Value::Text(raw.to_string()))
        }
        None => Value::Text(raw.to_string()),
    }
}

/// Parse through `f64` so "3.0" is accepted, then truncate toward zero.
fn truncate(raw: &str) -> Option<i64> {
    let f = raw.parse::<f64>().ok()?;
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return None;
    }
    Some(f.trunc() as i64)
}
