//! Session multiplexing for an embedding host.
//!
//! A host that renders the web page itself (rather than letting it open a
//! WebSocket) relays every socket through one channel of JSON envelopes:
//!
//! ```text
//! host → bridge   {"method":"open",  "socketId":3, "type":"BT"}
//!                 {"method":"send",  "socketId":3, "jsonrpc":"{...}"}
//!                 {"method":"close", "socketId":3}
//! bridge → host   {"socketId":3, "message":"{...}"}
//! ```
//!
//! [`SessionManager`] keeps one session task per `socketId` and tags every
//! outbound frame with the socket it belongs to.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{DeviceDirectory, SessionSettings};
use crate::infrastructure::session_task::{spawn_session, SessionHandle};

/// Host-assigned socket number.
pub type SocketId = i64;

/// What the host asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMethod {
    Open,
    Close,
    Send,
}

/// Kind of session a socket wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    #[serde(rename = "BT")]
    Bt,
    #[serde(rename = "BLE")]
    Ble,
}

impl SessionKind {
    /// Derives the kind from a socket URL such as `ws://localhost:20110/scratch/bt`.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or_default();
        match path.trim_end_matches('/').rsplit('/').next()? {
            "bt" => Some(Self::Bt),
            "ble" => Some(Self::Ble),
            _ => None,
        }
    }
}

/// One host → bridge envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEnvelope {
    pub method: HostMethod,
    pub socket_id: SocketId,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<SessionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
}

/// One bridge → host envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMessage {
    pub socket_id: SocketId,
    pub message: String,
}

/// Reasons an envelope was not acted on.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("socket {0} is already open")]
    AlreadyOpen(SocketId),

    #[error("socket {0}: open without a session type")]
    MissingKind(SocketId),

    #[error("socket {0}: BLE sessions are not supported")]
    Unsupported(SocketId),

    #[error("socket {0} is not open")]
    UnknownSocket(SocketId),

    #[error("socket {0}: send without a jsonrpc payload")]
    MissingPayload(SocketId),
}

/// Owns the sessions of one host channel.
pub struct SessionManager {
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
    host_tx: mpsc::UnboundedSender<HostMessage>,
    sessions: HashMap<SocketId, SessionHandle>,
}

impl SessionManager {
    /// Creates a manager whose sessions' output is sent to `host_tx`.
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        settings: SessionSettings,
        host_tx: mpsc::UnboundedSender<HostMessage>,
    ) -> Self {
        Self {
            directory,
            settings,
            host_tx,
            sessions: HashMap::new(),
        }
    }

    /// Parses and acts on one envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the envelope is malformed or cannot be
    /// acted on.  The manager's state is unchanged in that case.
    pub fn handle_envelope(&mut self, text: &str) -> Result<(), HostError> {
        let envelope: HostEnvelope = serde_json::from_str(text)?;
        let socket = envelope.socket_id;
        match envelope.method {
            HostMethod::Open => {
                let kind = envelope
                    .kind
                    .or_else(|| envelope.url.as_deref().and_then(SessionKind::from_url))
                    .ok_or(HostError::MissingKind(socket))?;
                self.open(socket, kind)
            }
            HostMethod::Close => {
                self.close(socket);
                Ok(())
            }
            HostMethod::Send => {
                let payload = envelope.jsonrpc.ok_or(HostError::MissingPayload(socket))?;
                self.send(socket, payload)
            }
        }
    }

    /// Starts a session for `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::AlreadyOpen`] if `socket` has a live session and
    /// [`HostError::Unsupported`] for BLE.
    pub fn open(&mut self, socket: SocketId, kind: SessionKind) -> Result<(), HostError> {
        self.prune();
        if self.sessions.contains_key(&socket) {
            return Err(HostError::AlreadyOpen(socket));
        }
        if kind == SessionKind::Ble {
            return Err(HostError::Unsupported(socket));
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let host_tx = self.host_tx.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if host_tx.send(HostMessage { socket_id: socket, message }).is_err() {
                    break;
                }
            }
        });

        let (handle, _task) = spawn_session(
            format!("socket-{socket}"),
            Arc::clone(&self.directory),
            self.settings,
            out_tx,
        );
        self.sessions.insert(socket, handle);
        info!("socket {socket}: BT session started");
        Ok(())
    }

    /// Tears down the session of `socket`, if any.
    pub fn close(&mut self, socket: SocketId) {
        match self.sessions.remove(&socket) {
            Some(handle) => handle.close(),
            None => debug!("socket {socket}: close for unknown socket"),
        }
    }

    /// Forwards a JSON-RPC frame to the session of `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::UnknownSocket`] if no live session exists.
    pub fn send(&mut self, socket: SocketId, payload: String) -> Result<(), HostError> {
        let Some(handle) = self.sessions.get(&socket) else {
            return Err(HostError::UnknownSocket(socket));
        };
        if handle.send_text(payload) {
            Ok(())
        } else {
            warn!("socket {socket}: session already ended");
            self.sessions.remove(&socket);
            Err(HostError::UnknownSocket(socket))
        }
    }

    /// Tears down every session.
    pub fn close_all(&mut self) {
        for (socket, handle) in self.sessions.drain() {
            debug!("socket {socket}: closing");
            handle.close();
        }
    }

    /// Number of live sessions.
    pub fn session_count(&mut self) -> usize {
        self.prune();
        self.sessions.len()
    }

    fn prune(&mut self) {
        self.sessions.retain(|_, handle| !handle.is_closed());
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
