//! Line-delimited host channel (`--mode host`).
//!
//! Reads one [`HostEnvelope`](super::session_manager::HostEnvelope) per line
//! and writes one [`HostMessage`] per line.  The binary wires this to stdin
//! and stdout; tests wire it to an in-memory duplex pipe.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{DeviceDirectory, SessionSettings};
use crate::infrastructure::session_manager::{HostMessage, SessionManager};

/// Serves envelopes from `reader` until it reaches end of input.
///
/// All sessions are closed when the input ends.
///
/// # Errors
///
/// Returns an error if reading from `reader` fails.
pub async fn run_host_pipe<R, W>(
    reader: R,
    writer: W,
    directory: Arc<dyn DeviceDirectory>,
    settings: SessionSettings,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (host_tx, host_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_messages(writer, host_rx));
    let mut manager = SessionManager::new(directory, settings, host_tx);
    info!("host pipe ready");

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("failed to read host envelope")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = manager.handle_envelope(line) {
            warn!("host envelope ignored: {e}");
        }
    }

    info!("host input ended; closing {} session(s)", manager.session_count());
    manager.close_all();
    drop(manager);
    if let Err(e) = writer_task.await {
        error!("host writer task failed: {e}");
    }
    Ok(())
}

/// Writes every message as one JSON line until all senders are gone.
async fn write_messages<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<HostMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                error!("socket {}: cannot encode host message: {e}", message.socket_id);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("host output closed: {e}");
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!("host output closed: {e}");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
