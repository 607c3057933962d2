//! WebSocket server: accept loop and per-connection session wiring.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from web pages.
//! 3. Upgrading each connection to a WebSocket, refusing any request path
//!    that does not end in `/bt` with `404 Not Found`.
//! 4. Spawning one session task per connection and running two forwarding
//!    loops next to it:
//!    - **Page → session**: WebSocket text frames become session commands.
//!    - **Session → page**: responses and notifications become text frames.
//! 5. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task, and the accept loop never
//! waits on a connection's I/O.
//!
//! # Portability
//!
//! Uses only `tokio::net` APIs.  Shutdown is triggered by a shared
//! `AtomicBool` that is cleared by the Ctrl+C handler in `main.rs`.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{DeviceDirectory, SessionSettings};
use crate::infrastructure::session_task::spawn_session;

/// Path suffix served by the Bluetooth Classic session.
pub const BT_PATH_SUFFIX: &str = "/bt";

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `addr` and serves connections until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    addr: SocketAddr,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    info!("WebSocket bridge listening on {addr}");
    serve(listener, directory, settings, running).await
}

/// Runs the accept loop on an already-bound listener until `running` is
/// cleared.  Accept errors are logged and the loop continues.
pub async fn serve(
    listener: TcpListener,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the `running` flag is re-checked while idle.
        let accept_result = timeout(Duration::from_millis(200), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let directory = Arc::clone(&directory);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, directory, settings).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
) {
    match run_connection(raw_stream, peer_addr, directory, settings).await {
        Ok(()) => info!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Accepts only request paths ending in [`BT_PATH_SUFFIX`].
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    let path = request.uri().path().trim_end_matches('/');
    if path.ends_with(BT_PATH_SUFFIX) {
        Ok(response)
    } else {
        let mut refusal = ErrorResponse::new(Some(format!("no session at {path}")));
        *refusal.status_mut() = StatusCode::NOT_FOUND;
        Err(refusal)
    }
}

async fn run_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
) -> anyhow::Result<()> {
    let ws_stream = accept_hdr_async(raw_stream, check_path)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let session_id = Uuid::new_v4().to_string();
    info!("session {session_id}: WebSocket established with {peer_addr}");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (handle, session_task) =
        spawn_session(session_id.as_str(), directory, settings, out_tx);

    // ── Session → page ────────────────────────────────────────────────────────
    //
    // Ends once the session task has dropped its outbound sender.
    let id_writer = session_id.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                debug!("session {id_writer}: WebSocket send failed (page disconnected)");
                return;
            }
        }
        let _ = ws_tx.send(WsMessage::Close(None)).await;
    });

    // ── Page → session ────────────────────────────────────────────────────────
    loop {
        let ws_msg = match ws_rx.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("session {session_id}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("session {session_id}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("session {session_id}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => {
                if !handle.send_text(text) {
                    debug!("session {session_id}: session ended; closing connection");
                    break;
                }
            }
            WsMessage::Binary(_) => {
                warn!("session {session_id}: unexpected binary WebSocket frame (ignored)");
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(_) => {
                debug!("session {session_id}: Close frame received");
                break;
            }
        }
    }

    handle.close();
    if let Err(e) = session_task.await {
        error!("session {session_id}: task failed: {e}");
    }
    let _ = writer_task.await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
