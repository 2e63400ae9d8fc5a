//! Body encoding helpers.
//!
//! Bodies travel through the pipeline as opaque [`Bytes`]; these helpers only
//! exist so callers and error bodies can be converted at the edges.

use bytes::Bytes;

use crate::Result;

/// `Content-Type` value for JSON bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `Content-Type` value for form URL-encoded bodies.
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Serialize a value to JSON bytes.
///
/// # Example
///
/// ```
/// use conduit_core::to_json;
///
/// let bytes = to_json(&serde_json::json!({"name": "Alice"})).expect("serialize");
/// assert_eq!(bytes.as_ref(), br#"{"name":"Alice"}"#);
/// ```
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(Into::into)
}

/// Serialize a value to form URL-encoded bytes.
pub fn to_form<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    serde_urlencoded::to_string(value)
        .map(Bytes::from)
        .map_err(Into::into)
}

/// Deserialize JSON bytes, reporting the path of the failing field.
pub fn from_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(&mut deserializer).map_err(|e| {
        crate::Error::json_deserialization(e.path().to_string(), e.inner().to_string())
    })
}
