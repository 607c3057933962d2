//! bt-link-bridge library crate.
//!
//! This crate runs JSON-RPC sessions that let a web page discover, connect to
//! and exchange bytes with paired Bluetooth Classic accessories.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Web page (JSON-RPC over WebSocket or host envelopes)
//!         ↕
//! [bt-link-bridge]
//!   ├── domain/           Ports (DeviceDirectory, accessory streams), config
//!   ├── application/      Dispatcher, session state machine, stream I/O
//!   └── infrastructure/
//!         ├── session_task/     One Tokio task per session
//!         ├── ws_server/        WebSocket accept loop (tokio-tungstenite)
//!         ├── session_manager/  Host envelope multiplexing
//!         └── memory_directory/ Loopback accessories
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O; it defines traits and plain types.
//! - `application` depends on `domain` and `bt-link-core` only, and is
//!   driven synchronously.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tungstenite`.

/// Domain layer: ports and configuration (no I/O).
pub mod domain;

/// Application layer: protocol dispatch and the session state machine.
pub mod application;

/// Infrastructure layer: session tasks, transports and directories.
pub mod infrastructure;
