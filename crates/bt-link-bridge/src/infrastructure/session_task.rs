//! The per-session actor.
//!
//! Every session runs on one Tokio task that owns the [`BtSession`] and
//! serialises everything that touches it:
//!
//! ```text
//! transport ──SessionCommand──┐
//!                              ├──► select! ──► ProtocolDispatcher / BtSession
//! directory + streams ──event─┘                        │
//!                                                      ▼
//!                                             outbound text frames
//! ```
//!
//! The task ends when the transport closes (or drops its handle) or when the
//! session tears itself down after a stream failure.  When it ends, the
//! session's outbound sender is dropped, which lets the transport writer
//! finish as well.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::application::{BtSession, Outbound, OutboundSender, ProtocolDispatcher};
use crate::domain::{DeviceDirectory, SessionSettings};

/// Messages from the transport to a session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// One inbound text frame.
    Frame(String),
    /// The client went away; tear the session down.
    Close,
}

/// Transport-side handle of a running session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Session identifier (used in logs).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queues an inbound text frame.  Returns `false` if the session task
    /// has already ended.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.commands
            .send(SessionCommand::Frame(text.into()))
            .is_ok()
    }

    /// Asks the session to tear down.  Harmless if it already has.
    pub fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close);
    }

    /// `true` once the session task has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Spawns a session task.
///
/// Outbound frames (responses and notifications) are pushed to `outbound`.
/// Must be called from within a Tokio runtime.
pub fn spawn_session(
    id: impl Into<Arc<str>>,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
    outbound: OutboundSender,
) -> (SessionHandle, JoinHandle<()>) {
    let id: Arc<str> = id.into();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_session(
        Arc::clone(&id),
        directory,
        settings,
        outbound,
        commands_rx,
    ));
    (
        SessionHandle {
            id,
            commands: commands_tx,
        },
        task,
    )
}

async fn run_session(
    id: Arc<str>,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
    outbound: OutboundSender,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
) {
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let outbound = Outbound::new(outbound, Arc::clone(&id));
    let dispatcher = ProtocolDispatcher::new(outbound.clone());
    let mut session = BtSession::new(directory, events_tx, outbound, settings);
    info!("session {id}: opened");

    while !session.is_closed() {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Frame(text)) => dispatcher.handle_text(&text, &mut session),
                Some(SessionCommand::Close) | None => {
                    debug!("session {id}: transport closed");
                    session.teardown();
                }
            },
            Some(event) = events.recv() => session.handle_event(event),
        }
    }

    info!("session {id}: closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
