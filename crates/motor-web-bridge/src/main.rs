//! Motor-Over-WS Bridge — entry point.
//!
//! This binary accepts WebSocket connections from browser dashboards and
//! bridges them to a motor-control device's plain-text TCP channel.  It acts
//! as a thin translation layer between the JSON-over-WebSocket browser
//! protocol and the newline-framed device protocol.
//!
//! # Why a separate bridge process?
//!
//! Web browsers can only communicate over HTTP/WebSocket — they cannot open
//! raw TCP sockets.  The motor device speaks newline-terminated ASCII over
//! raw TCP.  This bridge translates between the two so the web dashboard
//! (e.g., a React app) can:
//!
//! - Send motor commands (`START`, `STOP`, `ANGLE:90`, …) to the device.
//! - Receive live telemetry (distance, angle, speed) and plot it.
//!
//! # Usage
//!
//! ```text
//! motor-web-bridge [OPTIONS]
//!
//! Options:
//!   --ws-port         <PORT>  WebSocket listener port [default: 8765]
//!   --ws-bind         <ADDR>  WebSocket bind address [default: 0.0.0.0]
//!   --device-host     <HOST>  Default device IP [default: 192.168.1.100]
//!   --device-port     <PORT>  Device TCP port [default: 80]
//!   --auth-token      <TOK>   Shared secret INIT_CONNECTION must carry
//!   --reconnect-delay <SECS>  Delay between reconnect attempts [default: 3]
//!   --window-capacity <N>     Telemetry samples retained [default: 50]
//!   --direct                  Skip the auth handshake (development only)
//! ```
//!
//! # Environment variable overrides
//!
//! The CLI defaults can also be overridden with environment variables.
//! CLI args take precedence when both are present.
//!
//! | Variable                | Default         | Description                    |
//! |-------------------------|-----------------|--------------------------------|
//! | `MOTOR_WS_PORT`         | `8765`          | WebSocket listener port        |
//! | `MOTOR_WS_BIND`         | `0.0.0.0`       | WebSocket bind address         |
//! | `MOTOR_DEVICE_HOST`     | `192.168.1.100` | Default device IP              |
//! | `MOTOR_DEVICE_PORT`     | `80`            | Device TCP port                |
//! | `MOTOR_WS_TOKEN`        | (unset)         | Shared auth secret             |
//! | `MOTOR_RECONNECT_DELAY` | `3`             | Reconnect delay (secs)         |
//! | `MOTOR_WINDOW_CAPACITY` | `50`            | Telemetry samples retained     |
//! | `MOTOR_DIRECT`          | (unset)         | Enable direct mode             |
//!
//! # Architecture overview
//!
//! ```text
//! Web Dashboard  (JSON over WebSocket)
//!       ↕
//! motor-web-bridge  ← this process
//!   domain/         BridgeConfig, wire message types
//!   application/    Session state machine, auth gate, telemetry fan-out
//!   infrastructure/
//!     ws_server/    Accept WebSocket connections
//!     device_conn/  TCP transport to the device
//!     reconnect/    Device connection supervisor
//!       ↕
//! Motor device  (newline-framed text over TCP, port 80)
//! ```

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use motor_web_bridge::application::SessionBridge;
use motor_web_bridge::domain::{BridgeConfig, DeviceEndpoint};
use motor_web_bridge::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Motor-Over-WS bridge.
///
/// Accepts WebSocket connections from browser dashboards and bridges them to
/// a motor-control device's plain-text TCP channel.
#[derive(Debug, Parser)]
#[command(
    name = "motor-web-bridge",
    about = "WebSocket-to-TCP bridge for browser-controlled motor devices",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server to listen on.
    ///
    /// Dashboards connect to this port via WebSocket (ws://host:PORT).
    #[arg(long, default_value_t = 8765, env = "MOTOR_WS_PORT")]
    ws_port: u16,

    /// IP address to bind the WebSocket server to.
    ///
    /// Use `0.0.0.0` to accept connections from any network interface (LAN +
    /// localhost), or `127.0.0.1` to accept only local connections.
    #[arg(long, default_value = "0.0.0.0", env = "MOTOR_WS_BIND")]
    ws_bind: String,

    /// Default device IP address.
    ///
    /// In production the `INIT_CONNECTION` envelope overrides this; direct
    /// mode uses it as-is.
    #[arg(long, default_value = "192.168.1.100", env = "MOTOR_DEVICE_HOST")]
    device_host: String,

    /// TCP port of the device's command/telemetry channel.
    ///
    /// Always taken from here — the envelope carries only an IP.
    #[arg(long, default_value_t = 80, env = "MOTOR_DEVICE_PORT")]
    device_port: u16,

    /// Shared secret an `INIT_CONNECTION` envelope must carry.
    ///
    /// When unset, every envelope is rejected as unauthorized and only
    /// `--direct` can establish a device session.
    #[arg(long, env = "MOTOR_WS_TOKEN")]
    auth_token: Option<String>,

    /// Fixed delay between device reconnection attempts, in seconds.
    #[arg(long, default_value_t = 3, env = "MOTOR_RECONNECT_DELAY")]
    reconnect_delay: u64,

    /// Number of telemetry samples retained for replay to new dashboards.
    #[arg(long, default_value_t = 50, env = "MOTOR_WINDOW_CAPACITY")]
    window_capacity: usize,

    /// Development mode: the first command frame starts bridging against
    /// `--device-host`, with no envelope and no token.
    #[arg(long, env = "MOTOR_DIRECT")]
    direct: bool,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--ws-bind` or `--device-host` is not a valid IP
    /// address.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ws_bind_addr: SocketAddr = format!("{}:{}", self.ws_bind, self.ws_port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid WebSocket bind address: '{}:{}'",
                    self.ws_bind, self.ws_port
                )
            })?;

        let device_host = self
            .device_host
            .parse()
            .with_context(|| format!("invalid device host: '{}'", self.device_host))?;

        Ok(BridgeConfig {
            ws_bind_addr,
            device_endpoint: DeviceEndpoint {
                host: device_host,
                port: self.device_port,
            },
            auth_token: self.auth_token,
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
            window_capacity: self.window_capacity,
            direct_mode: self.direct,
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised; the log level is controlled by
///    the `RUST_LOG` environment variable (e.g., `RUST_LOG=debug`).
/// 2. CLI arguments are parsed with `clap` into a [`Cli`] struct.
/// 3. A [`BridgeConfig`] is constructed and the single [`SessionBridge`]
///    created from it.
/// 4. A Ctrl+C handler is spawned; it clears the shared running flag and
///    begins the session's graceful shutdown (notifying every dashboard and
///    cancelling any pending device reconnection).
/// 5. [`run_server`] binds the WebSocket port and accepts dashboard
///    connections until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_bridge_config()?;

    info!(
        "Motor-Over-WS bridge starting — ws={}, device={}",
        config.ws_bind_addr, config.device_endpoint
    );

    let session = SessionBridge::new(Arc::new(config));

    // `AtomicBool` with `Relaxed` ordering is enough here: the accept loop
    // only needs the cleared flag to propagate eventually (it re-checks
    // every 200 ms).
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    let session_clone = Arc::clone(&session);

    // Ctrl+C (SIGINT on Unix) triggers the graceful shutdown path: stop
    // accepting, tell every dashboard the session ended, cancel any pending
    // device reconnection.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C — initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
                session_clone.shutdown();
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(Arc::clone(&session), running).await?;

    // The accept loop may exit before Ctrl+C is seen (tests clear the flag
    // directly); make sure the session is down either way.
    session.shutdown();

    info!("Motor-Over-WS bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
