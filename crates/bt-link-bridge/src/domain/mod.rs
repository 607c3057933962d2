//! Domain layer for bt-link-bridge.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or external frameworks.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - The ports the session talks to: the device directory and the
//!   accessory byte streams, expressed as traits
//! - The events those ports post back to a session
//!
//! # What does NOT belong here?
//!
//! - WebSocket types, sockets, file I/O
//! - Concrete directory implementations (those live in `infrastructure`)

pub mod config;
pub mod ports;

pub use config::{BridgeConfig, SessionSettings};
pub use ports::{
    AccessoryInput, AccessoryOutput, DeviceDirectory, DirectoryError, DirectoryEvent,
    EventSender, SessionEvent, StreamEvent, StreamPair, StreamSide, SubscriptionId,
};
