//! JSON-RPC 2.0 frames and the error taxonomy surfaced to clients.
//!
//! Every message on the client-facing text channel is exactly one JSON
//! object.  Three shapes exist:
//!
//! ```text
//! Request       {"jsonrpc":"2.0","id":1,"method":"discover","params":{...}}
//! Response      {"jsonrpc":"2.0","id":1,"result":null}
//!               {"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid params","data":"..."}}
//! Notification  {"jsonrpc":"2.0","method":"didDiscoverPeripheral","params":{...}}
//! ```
//!
//! A request without an `id` is a client-side notification: it is dispatched
//! like any other call but never answered.  Notifications sent by the bridge
//! never carry an `id`, so clients cannot (and must not) correlate them with
//! pending calls.
//!
//! # Error taxonomy
//!
//! | Variant          | Code     | Meaning                                              |
//! |------------------|----------|------------------------------------------------------|
//! | `ParseError`     | -32700   | The frame is not valid JSON                          |
//! | `InvalidRequest` | -32600   | Well-formed call that cannot be satisfied right now  |
//! | `MethodNotFound` | -32601   | No handler claimed the method                        |
//! | `InvalidParams`  | -32602   | A required field is missing or has the wrong shape   |
//! | `ServerError`    | custom   | Hardware or transport failure (-32500 for I/O)       |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Value of the `jsonrpc` member on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code for a frame that is not valid JSON.
pub const PARSE_ERROR: i64 = -32700;
/// Error code for a call that is well-formed but not satisfiable.
pub const INVALID_REQUEST: i64 = -32600;
/// Error code for a method that no handler claimed.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Error code for missing or mistyped parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Server error code reserved for generic hardware/stream I/O failure.
pub const SERVER_ERROR_IO: i64 = -32500;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors reported to the client inside a JSON-RPC error envelope.
///
/// Nothing else ever crosses the protocol boundary: internal failures are
/// mapped to one of these variants before they reach the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The inbound text was not valid JSON.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The call is well-formed but cannot be satisfied in the current
    /// session (unknown device id, no usable protocol, malformed envelope).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Neither the session nor the base handler recognised the method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A required parameter is missing or has the wrong type.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A hardware or transport failure.
    #[error("server error {code}: {message}")]
    ServerError { code: i64, message: String },
}

impl RpcError {
    /// Builds a [`RpcError::ServerError`] with the reserved I/O code `-32500`.
    pub fn io(message: impl Into<String>) -> Self {
        Self::ServerError {
            code: SERVER_ERROR_IO,
            message: message.into(),
        }
    }

    /// Returns the numeric JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::ParseError(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::ServerError { code, .. } => *code,
        }
    }

    /// Converts the error into the `error` member of a response frame.
    ///
    /// Standard kinds use the fixed JSON-RPC message and carry the detail in
    /// `data`.  Server errors have no standard message, so their detail is
    /// the message itself.
    pub fn to_error_object(&self) -> ErrorObject {
        let (message, data) = match self {
            Self::ParseError(d) => ("Parse error", Some(d)),
            Self::InvalidRequest(d) => ("Invalid Request", Some(d)),
            Self::MethodNotFound(d) => ("Method not found", Some(d)),
            Self::InvalidParams(d) => ("Invalid params", Some(d)),
            Self::ServerError { message, .. } => {
                return ErrorObject {
                    code: self.code(),
                    message: message.clone(),
                    data: None,
                }
            }
        };
        ErrorObject {
            code: self.code(),
            message: message.to_string(),
            data: data.map(|d| Value::String(d.clone())),
        }
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code (see the module-level table).
    pub code: i64,
    /// Short human-readable description.
    pub message: String,
    /// Optional free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ── Inbound frames ────────────────────────────────────────────────────────────

/// A method call received from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    /// Protocol version marker; accepted but not enforced.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Correlation id.  `None` marks a client notification (no response).
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name, e.g. `"discover"`.
    pub method: String,
    /// Method parameters.  Missing or `null` params become an empty object.
    #[serde(default = "empty_params", deserialize_with = "params_or_empty")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(if value.is_null() { empty_params() } else { value })
}

/// Anything the client can legitimately send on the text channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A method call (with or without an id).
    Request(Request),
    /// A reply to a message the bridge initiated (e.g. `ping`).
    Response {
        /// Correlation id echoed by the client.
        id: Value,
        /// `Ok(result)` or `Err(error object)`.
        outcome: Result<Value, ErrorObject>,
    },
}

/// A frame that could not be decoded, together with the id to answer with.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct FrameError {
    /// The request id if it could be recovered, otherwise `null`.
    pub id: Value,
    /// What went wrong.
    pub error: RpcError,
}

/// Decodes one inbound text frame.
///
/// # Errors
///
/// - [`RpcError::ParseError`] if `text` is not JSON.
/// - [`RpcError::InvalidRequest`] if the JSON is not an object, or is an
///   object with neither a string `method` nor a `result`/`error` member.
///
/// # Example
///
/// ```rust
/// use bt_link_core::{decode_frame, InboundFrame};
///
/// let frame = decode_frame(r#"{"jsonrpc":"2.0","id":7,"method":"getVersion"}"#).unwrap();
/// match frame {
///     InboundFrame::Request(req) => assert_eq!(req.method, "getVersion"),
///     other => panic!("unexpected frame {other:?}"),
/// }
/// ```
pub fn decode_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(text).map_err(|e| FrameError {
        id: Value::Null,
        error: RpcError::ParseError(e.to_string()),
    })?;

    let Value::Object(map) = &value else {
        return Err(FrameError {
            id: Value::Null,
            error: RpcError::InvalidRequest("frame must be a JSON object".to_string()),
        });
    };

    let id = map.get("id").cloned().unwrap_or(Value::Null);

    if map.contains_key("method") {
        return serde_json::from_value::<Request>(value)
            .map(InboundFrame::Request)
            .map_err(|e| FrameError {
                id,
                error: RpcError::InvalidRequest(e.to_string()),
            });
    }

    if let Some(error) = map.get("error") {
        let error = serde_json::from_value::<ErrorObject>(error.clone()).map_err(|e| FrameError {
            id: id.clone(),
            error: RpcError::InvalidRequest(e.to_string()),
        })?;
        return Ok(InboundFrame::Response {
            id,
            outcome: Err(error),
        });
    }

    if let Some(result) = map.get("result") {
        return Ok(InboundFrame::Response {
            id,
            outcome: Ok(result.clone()),
        });
    }

    Err(FrameError {
        id,
        error: RpcError::InvalidRequest("missing method".to_string()),
    })
}

// ── Outbound frames ───────────────────────────────────────────────────────────

/// Result or error member of a [`Response`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// `{"result": ...}`
    Result(Value),
    /// `{"error": {...}}`
    Error(ErrorObject),
}

/// A response to a client request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The id of the request being answered (`null` if it was unreadable).
    pub id: Value,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Builds a response from a handler result.
    pub fn new(id: Value, result: Result<Value, RpcError>) -> Self {
        let outcome = match result {
            Ok(value) => Outcome::Result(value),
            Err(e) => Outcome::Error(e.to_error_object()),
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            outcome,
        }
    }

    /// Serializes the response to a JSON text frame.
    pub fn to_text(&self) -> String {
        // Serializing a `Value`-based struct to a string cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A server-initiated message with no correlation id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Method name, e.g. `"didReceiveMessage"`.
    pub method: String,
    /// Notification payload.
    pub params: Value,
}

impl Notification {
    /// Builds a notification frame.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    /// Serializes the notification to a JSON text frame.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
