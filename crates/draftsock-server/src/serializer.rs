//! Message serialization between application values and frame payloads.
//!
//! A serializer maps [`serde_json::Value`]s to payload bytes and back. It
//! has no framing responsibility; the bound draft wraps whatever it
//! produces. Built-ins are selected by short name at server construction.

use std::sync::Arc;

use serde_json::Value;

/// Errors from serializing or deserializing a message payload.
#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode and decode application messages.
///
/// Must round-trip for any value the application sends.
pub trait Serializer: Send + Sync {
    /// Short name used for selection and diagnostics.
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError>;

    fn deserialize(&self, data: &[u8]) -> Result<Value, SerializerError>;
}

/// JSON serializer. Useful for communicating with browsers.
pub struct Json;

impl Serializer for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, SerializerError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// UTF-8 pass-through serializer. String values go out as their raw text;
/// anything else falls back to compact JSON. Inbound bytes arrive as a
/// string value.
pub struct Text;

impl Serializer for Text {
    fn name(&self) -> &'static str {
        "text"
    }

    fn serialize(&self, value: &Value) -> Result<Vec<u8>, SerializerError> {
        match value {
            Value::String(text) => Ok(text.clone().into_bytes()),
            other => Ok(serde_json::to_vec(other)?),
        }
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, SerializerError> {
        Ok(Value::String(String::from_utf8_lossy(data).into_owned()))
    }
}

/// Resolve a built-in serializer by short name.
pub fn by_name(name: &str) -> Option<Arc<dyn Serializer>> {
    match name.to_ascii_lowercase().as_str() {
        "json" => Some(Arc::new(Json)),
        "text" => Some(Arc::new(Text)),
        _ => None,
    }
}
