//! JSON-RPC dispatch: inbound text frame → method call → session handler.
//!
//! The dispatcher is shared by every session kind.  It decodes a frame,
//! offers the call to the session-specific [`CallHandler`], and if the
//! handler declines, runs the common base path (`getVersion`, `pingMe`,
//! and finally "method not found").
//!
//! # Completions
//!
//! A call is answered through its [`Responder`], which may be resolved
//! immediately or stored and resolved later (a `send` queued behind
//! backpressure).  Responses therefore leave in completion order, not in
//! arrival order.  Notifications go through [`Outbound::notify`] at any time
//! and carry no id.

use std::sync::Arc;

use bt_link_core::protocol::messages::{
    VersionInfo, METHOD_GET_VERSION, METHOD_PING_ME, NOTIFY_PING,
};
use bt_link_core::{decode_frame, InboundFrame, Notification, Response, RpcError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Sending half of the channel that carries text frames to the transport.
pub type OutboundSender = mpsc::UnboundedSender<String>;

// ── Outbound ──────────────────────────────────────────────────────────────────

/// Session-labelled handle for pushing frames to the client.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: OutboundSender,
    session: Arc<str>,
}

impl Outbound {
    /// Wraps the transport channel of session `session`.
    pub fn new(tx: OutboundSender, session: impl Into<Arc<str>>) -> Self {
        Self {
            tx,
            session: session.into(),
        }
    }

    /// Session identifier used in log messages.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Pushes an unsolicited notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        debug!("session {}: notify {method}", self.session);
        self.push(Notification::new(method, params).to_text());
    }

    fn push(&self, frame: String) {
        if self.tx.send(frame).is_err() {
            debug!("session {}: transport closed; frame dropped", self.session);
        }
    }
}

// ── Calls ─────────────────────────────────────────────────────────────────────

/// Completion handle of one inbound request.
///
/// Consumed on resolution, so a call is answered at most once.  Requests
/// sent without an `id` are client notifications and are never answered.
pub struct Responder {
    id: Option<Value>,
    method: String,
    outbound: Outbound,
}

impl Responder {
    /// Creates a responder for request `id` of `method`.
    pub fn new(id: Option<Value>, method: impl Into<String>, outbound: Outbound) -> Self {
        Self {
            id,
            method: method.into(),
            outbound,
        }
    }

    /// Sends the result (or error) of the call to the client.
    pub fn resolve(self, result: Result<Value, RpcError>) {
        if let Err(e) = &result {
            debug!(
                "session {}: {} failed: {e}",
                self.outbound.session(),
                self.method
            );
        }
        match self.id {
            Some(id) => self.outbound.push(Response::new(id, result).to_text()),
            None => debug!(
                "session {}: {} was a notification; no response sent",
                self.outbound.session(),
                self.method
            ),
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish()
    }
}

/// A decoded method call on its way to a handler.
#[derive(Debug)]
pub struct Call {
    /// Method name.
    pub method: String,
    /// Method parameters (an object, `{}` when absent).
    pub params: Value,
    /// Completion handle.
    pub responder: Responder,
}

/// Session-specific routing.
pub trait CallHandler {
    /// Handles `call` if the method is valid in the current state.
    ///
    /// Returns the call back, untouched, when it is not claimed; the
    /// dispatcher then runs the base path.
    fn handle_call(&mut self, call: Call) -> Option<Call>;
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Decodes inbound frames and routes them.
#[derive(Debug, Clone)]
pub struct ProtocolDispatcher {
    outbound: Outbound,
}

impl ProtocolDispatcher {
    /// Creates a dispatcher answering through `outbound`.
    pub fn new(outbound: Outbound) -> Self {
        Self { outbound }
    }

    /// Handles one inbound text frame.
    ///
    /// Malformed frames are answered with a parse or invalid-request error;
    /// replies from the client to bridge-initiated messages are logged and
    /// dropped.
    pub fn handle_text<H: CallHandler>(&self, text: &str, handler: &mut H) {
        let session = self.outbound.session();
        match decode_frame(text) {
            Ok(InboundFrame::Request(request)) => {
                debug!("session {session}: call {}", request.method);
                let call = Call {
                    responder: Responder::new(
                        request.id,
                        request.method.clone(),
                        self.outbound.clone(),
                    ),
                    method: request.method,
                    params: request.params,
                };
                if let Some(unclaimed) = handler.handle_call(call) {
                    self.handle_base(unclaimed);
                }
            }
            Ok(InboundFrame::Response { id, outcome }) => match outcome {
                Ok(_) => debug!("session {session}: client acknowledged {id}"),
                Err(e) => debug!(
                    "session {session}: client answered {id} with error {}: {}",
                    e.code, e.message
                ),
            },
            Err(e) => {
                warn!("session {session}: rejected frame: {e}");
                self.outbound.push(Response::new(e.id, Err(e.error)).to_text());
            }
        }
    }

    /// Methods shared by every session kind.
    fn handle_base(&self, call: Call) {
        let Call {
            method, responder, ..
        } = call;
        match method.as_str() {
            METHOD_GET_VERSION => {
                let version = serde_json::to_value(VersionInfo::default()).unwrap_or_default();
                responder.resolve(Ok(version));
            }
            METHOD_PING_ME => {
                responder.resolve(Ok(json!("willPing")));
                self.outbound.notify(NOTIFY_PING, json!({}));
            }
            _ => responder.resolve(Err(RpcError::MethodNotFound(method))),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
