//! Protocol module containing JSON-RPC frames, method parameter types and
//! the binary buffer framing.

pub mod buffer;
pub mod jsonrpc;
pub mod messages;

pub use buffer::{decode_buffer, encode_buffer, BufferError};
pub use jsonrpc::{decode_frame, InboundFrame, Notification, Request, Response, RpcError};
pub use messages::*;
