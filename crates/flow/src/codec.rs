//! Pluggable payload serialization and duration transformation
//!
//! Every activity input/output, marker detail and control payload passes
//! through a [`Serializer`]; every wall-clock duration passes through a
//! [`DurationTransform`] before it is encoded for the wire.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Errors from payload (de)serialization
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] serde_json::Error),
}

/// Converts payloads to and from their wire string
///
/// The trait works on [`serde_json::Value`] so it stays object safe; use
/// [`to_payload`] and [`from_payload`] for typed values.
pub trait Serializer: Send + Sync + 'static {
    fn serialize(&self, value: &Value) -> Result<String, CodecError>;

    fn deserialize(&self, payload: &str) -> Result<Value, CodecError>;
}

/// Serialize a typed value through a [`Serializer`]
pub fn to_payload<T: Serialize + ?Sized>(
    serializer: &dyn Serializer,
    value: &T,
) -> Result<String, CodecError> {
    let value = serde_json::to_value(value).map_err(CodecError::Serialize)?;
    serializer.serialize(&value)
}

/// Deserialize a typed value through a [`Serializer`]
pub fn from_payload<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    payload: &str,
) -> Result<T, CodecError> {
    let value = serializer.deserialize(payload)?;
    serde_json::from_value(value).map_err(CodecError::Deserialize)
}

/// JSON text serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(CodecError::Serialize)
    }

    fn deserialize(&self, payload: &str) -> Result<Value, CodecError> {
        serde_json::from_str(payload).map_err(CodecError::Deserialize)
    }
}

/// Transforms durations before they are sent to the remote service
pub trait DurationTransform: Send + Sync + 'static {
    fn transform(&self, duration: Duration) -> Duration;
}

/// Leaves durations untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl DurationTransform for IdentityTransform {
    fn transform(&self, duration: Duration) -> Duration {
        duration
    }
}

/// Divides every duration by a fixed factor (test acceleration)
#[derive(Debug, Clone, Copy)]
pub struct ScaledTransform {
    factor: u32,
}

impl ScaledTransform {
    /// A factor of 0 is treated as 1
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
        }
    }
}

impl DurationTransform for ScaledTransform {
    fn transform(&self, duration: Duration) -> Duration {
        duration / self.factor
    }
}

/// Wire marker for "no timeout"
pub const NO_DURATION: &str = "NONE";

/// Encode a duration as integer seconds, `None` as `"NONE"`
///
/// Sub-second remainders are truncated.
pub fn encode_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => d.as_secs().to_string(),
        None => NO_DURATION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn test_typed_payload() {
        let order = Order {
            id: 7,
            sku: "abc".to_string(),
        };
        let payload = to_payload(&JsonSerializer, &order).unwrap();
        assert_eq!(payload, r#"{"id":7,"sku":"abc"}"#);

        let parsed: Order = from_payload(&JsonSerializer, &payload).unwrap();
        assert_eq!(parsed, order);
    }

    #[test]
    fn test_invalid_payload() {
        let result: Result<Order, _> = from_payload(&JsonSerializer, "not json");
        assert!(matches!(result, Err(CodecError::Deserialize(_))));
    }

    #[test]
    fn test_duration_encoding() {
        assert_eq!(encode_duration(Some(Duration::from_secs(90))), "90");
        assert_eq!(encode_duration(Some(Duration::from_millis(1500))), "1");
        assert_eq!(encode_duration(None), "NONE");
    }

    #[test]
    fn test_scaled_transform() {
        let transform = ScaledTransform::new(60);
        assert_eq!(
            transform.transform(Duration::from_secs(3600)),
            Duration::from_secs(60)
        );
        assert_eq!(
            ScaledTransform::new(0).transform(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }
}
