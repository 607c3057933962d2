//! TOML configuration file.
//!
//! The file is optional.  When given, it overrides the built-in defaults and
//! is itself overridden by command-line flags.
//!
//! ```toml
//! [bridge]
//! ws_bind = "127.0.0.1:20110"
//! read_chunk_size = 128
//! loopback_capacity = 4096
//!
//! [[accessories]]
//! id = 1
//! name = "EV3"
//! protocols = ["COM.LEGO.MINDSTORMS.EV3"]
//! address = "00:16:53:AA:BB:CC"
//! ```
//!
//! Every key is optional; a missing `[bridge]` table keeps the defaults.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bt_link_core::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::BridgeConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `ws_bind` is not a `host:port` socket address.
    #[error("invalid ws_bind address {0:?}")]
    InvalidAddress(String),

    /// A numeric setting is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Contents of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub bridge: BridgeSection,
    #[serde(default)]
    pub accessories: Vec<DeviceDescriptor>,
}

/// The `[bridge]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeSection {
    /// WebSocket listen address, `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_bind: Option<String>,
    /// Bytes per read while draining an accessory's input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_chunk_size: Option<usize>,
    /// Buffer size of loopback accessories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loopback_capacity: Option<usize>,
}

impl FileConfig {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays the file's settings onto `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an unparsable address, a zero-sized
    /// chunk or buffer, or duplicate accessory ids.
    pub fn apply_to(self, config: &mut BridgeConfig) -> Result<(), ConfigError> {
        if let Some(raw) = self.bridge.ws_bind {
            config.ws_bind_addr = raw
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidAddress(raw.clone()))?;
        }
        if let Some(size) = self.bridge.read_chunk_size {
            config.session.read_chunk_size = non_zero("read_chunk_size", size)?;
        }
        if let Some(size) = self.bridge.loopback_capacity {
            config.loopback_capacity = non_zero("loopback_capacity", size)?;
        }

        let mut seen = HashSet::new();
        for device in &self.accessories {
            if !seen.insert(device.id) {
                return Err(ConfigError::InvalidValue {
                    key: "accessories",
                    reason: format!("duplicate id {}", device.id),
                });
            }
        }
        if !self.accessories.is_empty() {
            config.accessories = self.accessories;
        }
        Ok(())
    }
}

fn non_zero(key: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero".to_string(),
        })
    } else {
        Ok(value)
    }
}

/// Reads and parses the file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    FileConfig::from_toml(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
