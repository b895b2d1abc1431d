//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! It is constructed from CLI arguments and environment variables in
//! `main.rs` (production) or from [`Default`] (local development and tests).
//! The domain layer never reads environment variables itself; keeping the
//! configuration a plain struct with no ambient state makes the bridge easy
//! to embed in tests.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use motor_core::DEFAULT_WINDOW_CAPACITY;

// ── Device endpoint ───────────────────────────────────────────────────────────

/// The device the bridge connects to.
///
/// Immutable once a session starts: in production the host comes from the
/// client's `INIT_CONNECTION` envelope, in development direct mode it is
/// fixed by configuration.  The port always comes from configuration — the
/// envelope carries only an IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// IP address of the device.
    pub host: IpAddr,
    /// TCP port of the device's command/telemetry channel.
    pub port: u16,
}

impl DeviceEndpoint {
    /// The socket address to dial.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl std::fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.addr())
    }
}

// ── Bridge configuration ──────────────────────────────────────────────────────

/// All runtime configuration for the bridge.
///
/// Build this once at startup and wrap it in an `Arc` so it can be shared
/// cheaply across session tasks.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address and port the WebSocket server binds to.  `0.0.0.0` accepts
    /// connections from any interface; `127.0.0.1` restricts to local only.
    pub ws_bind_addr: SocketAddr,

    /// Default device endpoint.  Used as-is in direct mode; in envelope mode
    /// only its port is used (the envelope supplies the host).
    pub device_endpoint: DeviceEndpoint,

    /// Shared secret an `INIT_CONNECTION` envelope must carry.  `None` means
    /// no token is configured, and every envelope is rejected as
    /// unauthorized — direct mode is the only way in without a secret.
    pub auth_token: Option<String>,

    /// Fixed delay between device reconnection attempts.  There is
    /// deliberately no exponential backoff and no retry cap; retries stop
    /// only at explicit shutdown.
    pub reconnect_delay: Duration,

    /// Telemetry ring buffer capacity.
    pub window_capacity: usize,

    /// Development mode: a first client message that is *not* an
    /// `INIT_CONNECTION` envelope starts bridging against
    /// `device_endpoint` immediately, with no auth handshake.
    pub direct_mode: bool,
}

impl Default for BridgeConfig {
    /// Defaults suitable for local development.
    ///
    /// | Field            | Default           |
    /// |------------------|-------------------|
    /// | ws_bind_addr     | `0.0.0.0:8765`    |
    /// | device_endpoint  | `192.168.1.100:80`|
    /// | auth_token       | `None`            |
    /// | reconnect_delay  | 3 seconds         |
    /// | window_capacity  | 50                |
    /// | direct_mode      | `false`           |
    fn default() -> Self {
        Self {
            // Compile-time-known valid literals; parse cannot fail.
            ws_bind_addr: "0.0.0.0:8765".parse().unwrap(),
            device_endpoint: DeviceEndpoint {
                host: "192.168.1.100".parse().unwrap(),
                port: 80,
            },
            auth_token: None,
            reconnect_delay: Duration::from_secs(3),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            direct_mode: false,
        }
    }
}

impl BridgeConfig {
    /// Resolves the endpoint for an envelope-supplied device IP: the host
    /// comes from the envelope, the port from configuration.
    pub fn endpoint_for(&self, host: IpAddr) -> DeviceEndpoint {
        DeviceEndpoint {
            host,
            port: self.device_endpoint.port,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
