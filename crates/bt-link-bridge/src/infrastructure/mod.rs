//! Infrastructure layer for bt-link-bridge.
//!
//! The infrastructure layer handles all I/O and task management.
//!
//! # Responsibilities
//!
//! - Running each session as a Tokio task ([`session_task`])
//! - Accepting WebSocket connections ([`ws_server`])
//! - Multiplexing sessions over a host envelope channel
//!   ([`session_manager`], [`host_pipe`])
//! - The in-process loopback accessory directory ([`memory_directory`])
//! - Loading the TOML configuration file ([`config_file`])
//!
//! # What does NOT belong here?
//!
//! - Protocol decoding and the session state machine (application layer)
//! - Port definitions (domain layer)
//! - Command-line parsing (done in `main.rs`)

pub mod config_file;
pub mod host_pipe;
pub mod memory_directory;
pub mod session_manager;
pub mod session_task;
pub mod ws_server;

pub use config_file::{load_file_config, ConfigError, FileConfig};
pub use host_pipe::run_host_pipe;
pub use memory_directory::MemoryDirectory;
pub use session_manager::{HostEnvelope, HostError, HostMessage, SessionKind, SessionManager};
pub use session_task::{spawn_session, SessionCommand, SessionHandle};
pub use ws_server::{run_server, serve};
