//! BT-Link bridge entry point.
//!
//! This binary lets a web page discover, connect to and exchange bytes with
//! paired Bluetooth Classic accessories.  The page speaks JSON-RPC 2.0 over a
//! WebSocket (`ws://127.0.0.1:20110/…/bt`), or the embedding host relays the
//! same frames over stdin/stdout (`--mode host`).
//!
//! # Usage
//!
//! ```text
//! bt-link-bridge [OPTIONS]
//!
//! Options:
//!   --ws-bind <IP>              WebSocket bind address [default: 127.0.0.1]
//!   --ws-port <PORT>            WebSocket listener port [default: 20110]
//!   --mode <ws|host>            Transport [default: ws]
//!   --config <FILE>             TOML config file
//!   --read-chunk-size <BYTES>   Bytes per accessory read [default: 128]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the config file.
//!
//! | Variable             | Description                      |
//! |----------------------|----------------------------------|
//! | `BT_LINK_WS_BIND`    | WebSocket bind IP                |
//! | `BT_LINK_WS_PORT`    | WebSocket listener port          |
//! | `BT_LINK_MODE`       | `ws` or `host`                   |
//! | `BT_LINK_CONFIG`     | Path of the TOML config file     |
//! | `BT_LINK_READ_CHUNK` | Bytes per accessory read         |
//!
//! # Architecture overview
//!
//! ```text
//! Web page  (JSON-RPC over WebSocket or host envelopes)
//!       ↕
//! bt-link-bridge  ← this process
//!   domain/          ports, BridgeConfig
//!   application/     dispatcher, session state machine, stream I/O
//!   infrastructure/  ws_server, host_pipe, session tasks, directory
//!       ↕
//! Accessory directory + byte streams
//! ```
//!
//! Logs go to stderr so that stdout stays free for the host pipe.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bt_link_bridge::domain::{BridgeConfig, DeviceDirectory};
use bt_link_bridge::infrastructure::{load_file_config, run_host_pipe, run_server, MemoryDirectory};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Which transport carries the JSON-RPC frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One WebSocket connection per session.
    Ws,
    /// Line-delimited host envelopes on stdin/stdout.
    Host,
}

/// BT-Link bridge.
#[derive(Debug, Parser)]
#[command(
    name = "bt-link-bridge",
    about = "JSON-RPC bridge between web pages and Bluetooth Classic accessories",
    version
)]
struct Cli {
    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "BT_LINK_WS_BIND")]
    ws_bind: Option<IpAddr>,

    /// TCP port for the WebSocket server to listen on.
    #[arg(long, env = "BT_LINK_WS_PORT")]
    ws_port: Option<u16>,

    /// Transport to serve.
    #[arg(long, value_enum, default_value_t = Mode::Ws, env = "BT_LINK_MODE")]
    mode: Mode,

    /// TOML config file with bridge settings and the accessory list.
    #[arg(long, env = "BT_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Bytes requested per read while draining an accessory.
    #[arg(long, env = "BT_LINK_READ_CHUNK")]
    read_chunk_size: Option<usize>,
}

impl Cli {
    /// Builds the effective [`BridgeConfig`]: defaults, then the config
    /// file, then command-line values.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or is invalid, or
    /// if `--read-chunk-size` is zero.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = BridgeConfig::default();

        if let Some(path) = &self.config {
            load_file_config(path)
                .and_then(|file| file.apply_to(&mut config))
                .with_context(|| format!("invalid config file {}", path.display()))?;
        }

        if let Some(ip) = self.ws_bind {
            config.ws_bind_addr.set_ip(ip);
        }
        if let Some(port) = self.ws_port {
            config.ws_bind_addr.set_port(port);
        }
        if let Some(size) = self.read_chunk_size {
            anyhow::ensure!(size > 0, "--read-chunk-size must be greater than zero");
            config.session.read_chunk_size = size;
        }

        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // `RUST_LOG` controls the level; `info` when absent or invalid.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.mode;
    let config = cli.into_bridge_config()?;

    info!(
        "BT-Link bridge starting ({mode:?}) with {} accessor{}",
        config.accessories.len(),
        if config.accessories.len() == 1 { "y" } else { "ies" }
    );

    let directory: Arc<dyn DeviceDirectory> = Arc::new(MemoryDirectory::new(
        config.accessories.clone(),
        config.loopback_capacity,
    ));

    match mode {
        Mode::Ws => {
            // ── Graceful shutdown flag ────────────────────────────────────────
            let running = Arc::new(AtomicBool::new(true));
            let running_clone = Arc::clone(&running);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("received Ctrl+C, shutting down");
                        running_clone.store(false, Ordering::Relaxed);
                    }
                    Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
                }
            });

            run_server(config.ws_bind_addr, directory, config.session, running).await?;
        }
        Mode::Host => {
            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = run_host_pipe(stdin, tokio::io::stdout(), directory, config.session) => result?,
                _ = tokio::signal::ctrl_c() => info!("received Ctrl+C, shutting down"),
            }
        }
    }

    info!("BT-Link bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
