//! Binary-to-text framing for accessory payloads.
//!
//! JSON strings must be valid Unicode, but accessory traffic is arbitrary
//! bytes.  Payloads therefore travel as a small object:
//!
//! ```json
//! {"message":"AQID","encoding":"base64"}
//! ```
//!
//! Outbound (`didReceiveMessage`) payloads are always base64.  Inbound
//! (`send`) payloads may omit `encoding`, in which case `message` is taken
//! as plain UTF-8 text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::jsonrpc::RpcError;

/// The only binary encoding the bridge understands.
pub const ENCODING_BASE64: &str = "base64";

/// Errors produced while decoding a buffer object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    /// `message` is absent or not a string.
    #[error("message must be a string")]
    MissingMessage,

    /// `encoding` names something other than base64.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// `message` is not valid base64.
    #[error("malformed base64 payload: {0}")]
    MalformedBase64(String),
}

impl From<BufferError> for RpcError {
    fn from(e: BufferError) -> Self {
        RpcError::InvalidParams(e.to_string())
    }
}

/// Decodes the bytes carried by a buffer object.
///
/// # Errors
///
/// Returns [`BufferError`] if `message` is missing, the encoding is unknown,
/// or the base64 text is malformed.
///
/// # Example
///
/// ```rust
/// use bt_link_core::decode_buffer;
/// use serde_json::json;
///
/// let bytes = decode_buffer(&json!({"message": "AQID", "encoding": "base64"})).unwrap();
/// assert_eq!(bytes, vec![1, 2, 3]);
/// ```
pub fn decode_buffer(params: &Value) -> Result<Vec<u8>, BufferError> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .ok_or(BufferError::MissingMessage)?;

    match params.get("encoding") {
        None | Some(Value::Null) => Ok(message.as_bytes().to_vec()),
        Some(Value::String(encoding)) if encoding == ENCODING_BASE64 => BASE64
            .decode(message)
            .map_err(|e| BufferError::MalformedBase64(e.to_string())),
        Some(other) => Err(BufferError::UnsupportedEncoding(
            other.as_str().map_or_else(|| other.to_string(), str::to_string),
        )),
    }
}

/// Wraps bytes into a base64 buffer object.
pub fn encode_buffer(data: &[u8]) -> Value {
    json!({
        "message": BASE64.encode(data),
        "encoding": ENCODING_BASE64,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
