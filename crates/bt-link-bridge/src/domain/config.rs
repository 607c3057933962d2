//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It can be built from CLI arguments and an optional TOML file, or from
//! sensible defaults (useful for local development and tests).
//!
//! The infrastructure layer is responsible for populating it.

use std::net::SocketAddr;

use bt_link_core::DeviceDescriptor;

/// Default size of each bounded read in the inbound drain loop.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 128;

/// Default buffer size of in-memory loopback accessories.
pub const DEFAULT_LOOPBACK_CAPACITY: usize = 4096;

/// Per-session tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Bytes requested per read while draining the input stream.
    pub read_chunk_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use bt_link_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 20110);
/// assert_eq!(cfg.session.read_chunk_size, 128);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the WebSocket server binds to.
    ///
    /// Defaults to loopback: a web page on this machine is the only
    /// intended client.
    pub ws_bind_addr: SocketAddr,

    /// Settings applied to every session.
    pub session: SessionSettings,

    /// Buffer size of each in-memory loopback accessory.  When the buffer
    /// is full the accessory's output reports no space.
    pub loopback_capacity: usize,

    /// Accessories the in-memory directory starts with.
    pub accessories: Vec<DeviceDescriptor>,
}

impl Default for BridgeConfig {
    /// | Field             | Default            |
    /// |-------------------|--------------------|
    /// | ws_bind_addr      | `127.0.0.1:20110`  |
    /// | read_chunk_size   | 128 bytes          |
    /// | loopback_capacity | 4096 bytes         |
    /// | accessories       | none               |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([127, 0, 0, 1], 20110)),
            session: SessionSettings::default(),
            loopback_capacity: DEFAULT_LOOPBACK_CAPACITY,
            accessories: Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
