//! Telemetry payload decoding.
//!
//! The feed delivers either one record or an array of records as JSON text.
//! Anything else is rejected here so the caller can log it and carry on with
//! the next delivery.

use serde_json::Value;
use thiserror::Error;

/// Errors for a whole telemetry delivery. Individual bad records are not
/// errors; the identity resolver drops them.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid telemetry JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Telemetry payload is a {0}, expected an object or array")]
    NotAnObject(&'static str),

    #[error("Telemetry batch is empty")]
    EmptyBatch,
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Turn a decoded payload into a batch of raw records.
pub fn batch_from_value(payload: Value) -> Result<Vec<Value>, FeedError> {
    let batch = match payload {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => return Err(FeedError::NotAnObject(kind(&other))),
    };
    if batch.is_empty() {
        return Err(FeedError::EmptyBatch);
    }
    Ok(batch)
}

/// Decode a raw payload string into a batch of raw records.
pub fn decode_payload(text: &str) -> Result<Vec<Value>, FeedError> {
    let payload: Value = serde_json::from_str(text)?;
    batch_from_value(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_object_becomes_batch_of_one() {
        let batch = decode_payload(r#"{"id": 1, "lat": 35.1, "lng": 126.9}"#).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_array_payload() {
        let batch = decode_payload(r#"[{"id": 1}, {"id": 2}, 3]"#).unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(decode_payload("{lat: 1"), Err(FeedError::InvalidJson(_))));
    }

    #[test]
    fn test_non_object_payload() {
        assert!(matches!(decode_payload("42"), Err(FeedError::NotAnObject("number"))));
        assert!(matches!(decode_payload("\"hi\""), Err(FeedError::NotAnObject("string"))));
        assert!(matches!(decode_payload("null"), Err(FeedError::NotAnObject("null"))));
    }

    #[test]
    fn test_empty_array_is_skipped() {
        assert!(matches!(decode_payload("[]"), Err(FeedError::EmptyBatch)));
    }
}
