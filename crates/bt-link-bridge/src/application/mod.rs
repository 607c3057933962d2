//! Application layer for bt-link-bridge.
//!
//! The application layer knows *what* a session does; the infrastructure
//! layer decides *where* it runs and how bytes reach it.
//!
//! # Responsibilities
//!
//! - Decoding JSON-RPC frames and routing calls ([`dispatcher`])
//! - The Bluetooth Classic session state machine ([`session`])
//! - Write queueing, backpressure and input draining for a bound
//!   accessory ([`stream_io`])
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or reading stdin (that is infrastructure)
//! - Tokio task spawning (every type here is driven synchronously by the
//!   session task in the infrastructure layer)
//! - Concrete device directories

pub mod dispatcher;
pub mod session;
pub mod stream_io;

pub use dispatcher::{Call, CallHandler, Outbound, OutboundSender, ProtocolDispatcher, Responder};
pub use session::{BtSession, SessionPhase, NO_PERIPHERAL_CONNECTED};
pub use stream_io::{StreamFault, StreamIoManager, FAILED_TO_SEND, SESSION_CLOSED};
