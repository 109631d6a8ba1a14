use std::borrow::Cow;

use serde_json::{Map, Value};

use super::aliases::FieldAliases;
use crate::error::ParseError;
use crate::model::MetricKind;

/// Result of probing a payload for one metric.
///
/// `Absent` and `Malformed` both mean "no update"; they are kept apart so the
/// logs tell a missing key from a broken producer.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Value(f64),
    Absent,
    Malformed { key: String, raw: String },
}

impl Extraction {
    pub fn value(&self) -> Option<f64> {
        match self {
            Extraction::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Payload bytes as text. Invalid UTF-8 is replaced, never rejected.
pub fn decode_payload(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

pub fn parse_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ParseError::NotAnObject),
        Err(e) => Err(ParseError::InvalidJson(e.to_string())),
    }
}

/// Extracts `metric` from raw payload bytes.
///
/// Anything that is not a JSON object yields `Absent`.
pub fn extract(bytes: &[u8], metric: MetricKind, aliases: &FieldAliases) -> Extraction {
    match parse_object(&decode_payload(bytes)) {
        Ok(object) => extract_field(&object, aliases.candidates(metric)),
        Err(_) => Extraction::Absent,
    }
}

/// Tries `candidates` in order and converts the first non-null hit.
pub fn extract_field(object: &Map<String, Value>, candidates: &[String]) -> Extraction {
    let hit = candidates
        .iter()
        .find_map(|key| match object.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some((key, value)),
        });

    let Some((key, value)) = hit else {
        return Extraction::Absent;
    };

    match to_number(value) {
        Some(number) => Extraction::Value(number),
        None => Extraction::Malformed {
            key: key.clone(),
            raw: value.to_string(),
        },
    }
}

fn to_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
            trimmed.parse::<f64>().ok()?
        }
        _ => return None,
    };
    number.is_finite().then_some(number)
}
