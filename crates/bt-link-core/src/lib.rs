//! # bt-link-core
//!
//! Shared library for BT-Link containing the JSON-RPC wire protocol, the
//! binary buffer framing used to carry accessory bytes inside JSON text, and
//! the device descriptor types reported during discovery.
//!
//! This crate is used by the session bridge and by anything else that needs
//! to speak the same client-facing protocol.  It has zero dependencies on OS
//! APIs, async runtimes, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! BT-Link lets a web page talk to a paired Bluetooth accessory.  The page
//! sends JSON-RPC calls (`discover`, `connect`, `send`) over a text-message
//! channel; the bridge turns them into operations on the accessory's byte
//! streams and pushes bytes received from the accessory back as JSON
//! notifications.
//!
//! This crate (`bt-link-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How messages look on the text channel: request,
//!   response and notification frames, the error taxonomy, the parameter
//!   types of each method, and base64 framing for binary payloads.
//!
//! - **`domain`** – Pure types describing accessories: the
//!   [`DeviceDescriptor`] reported for every visible device and the
//!   [`DiscoveryFilter`] derived from a `discover` call.

pub mod domain;
pub mod protocol;

pub use domain::device::{DeviceDescriptor, DeviceId, DiscoveryFilter, RSSI_UNSUPPORTED};
pub use protocol::buffer::{decode_buffer, encode_buffer, BufferError};
pub use protocol::jsonrpc::{
    decode_frame, InboundFrame, Notification, Request, Response, RpcError, SERVER_ERROR_IO,
};
