//! TCP transport adapter for the motor-control device.
//!
//! The device channel is line-oriented in both directions: the bridge writes
//! newline-terminated ASCII command lines and reads newline-framed telemetry
//! payloads.  TCP being a stream protocol, framing is handled by a buffered
//! line reader rather than by fixed-size reads.
//!
//! Connection-state transitions are not a separate event stream: the read
//! loop in the supervisor observes EOF/read errors and the write path
//! observes [`WriteError`], and those exit reasons *are* the transition
//! events the reconnection supervisor consumes.
//!
//! # Portability
//!
//! Uses only `tokio::net` APIs, portable across Windows, Linux, and macOS.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use motor_core::Command;

use crate::domain::config::DeviceEndpoint;

/// How long a connection attempt may take before it is classified as a
/// timeout.  Embedded devices on a flaky LAN routinely blackhole SYNs, so
/// waiting for the OS default (minutes) would stall the supervisor.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ── Error types ───────────────────────────────────────────────────────────────

/// Failure to establish the device TCP connection.
///
/// All three variants are recoverable: they feed the reconnection
/// supervisor, never terminate the process.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The device host is up but nothing listens on the port.
    #[error("device {endpoint} refused the connection")]
    Refused {
        /// The endpoint that was dialed.
        endpoint: DeviceEndpoint,
    },

    /// The connection attempt did not complete within [`CONNECT_TIMEOUT`].
    #[error("timed out connecting to device {endpoint}")]
    Timeout {
        /// The endpoint that was dialed.
        endpoint: DeviceEndpoint,
    },

    /// Any other network-level failure (no route, network down, …).
    #[error("device {endpoint} unreachable: {source}")]
    Unreachable {
        /// The endpoint that was dialed.
        endpoint: DeviceEndpoint,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// Classifies an OS-level connect error by its `io::ErrorKind`.
    fn from_io(endpoint: DeviceEndpoint, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::ConnectionRefused => ConnectError::Refused { endpoint },
            io::ErrorKind::TimedOut => ConnectError::Timeout { endpoint },
            _ => ConnectError::Unreachable { endpoint, source },
        }
    }
}

/// The device socket closed (or broke) mid-write.
///
/// Handled exactly like [`ConnectError`]: the supervisor tears the
/// connection down and schedules a reconnect.
#[derive(Debug, Error)]
#[error("device write failed: {source}")]
pub struct WriteError {
    /// The underlying I/O error.
    #[source]
    pub source: io::Error,
}

// ── Connection handle ─────────────────────────────────────────────────────────

/// An open TCP connection to the device.
///
/// The handle is consumed by [`DeviceConnection::into_split`] (for the pump)
/// or [`DeviceConnection::close`]; either way it can be used at most once,
/// so "close is idempotent" holds structurally — there is no handle left to
/// close twice, and dropping any half always releases the socket.
pub struct DeviceConnection {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
}

impl DeviceConnection {
    /// Dials the device, classifying failures per [`ConnectError`].
    ///
    /// # Errors
    ///
    /// - [`ConnectError::Refused`] when the device actively rejects.
    /// - [`ConnectError::Timeout`] when the attempt exceeds
    ///   [`CONNECT_TIMEOUT`] (or the OS reports its own timeout).
    /// - [`ConnectError::Unreachable`] for everything else.
    pub async fn connect(endpoint: DeviceEndpoint) -> Result<Self, ConnectError> {
        let attempt = timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint.addr())).await;

        let stream = match attempt {
            Err(_elapsed) => return Err(ConnectError::Timeout { endpoint }),
            Ok(Err(e)) => return Err(ConnectError::from_io(endpoint, e)),
            Ok(Ok(stream)) => stream,
        };

        debug!("device connection established to {endpoint}");

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            read_half,
            write_half,
        })
    }

    /// Splits the connection for the pump: a buffered line reader and the
    /// raw write half.
    pub fn into_split(self) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
        (BufReader::new(self.read_half), self.write_half)
    }

    /// Gracefully closes the connection, consuming the handle.
    pub async fn close(mut self) {
        // A failed shutdown still releases the socket on drop.
        let _ = self.write_half.shutdown().await;
    }
}

/// Writes one encoded command line to the device.
///
/// `write_all` guarantees the entire line is written even if the OS accepts
/// only part of it at first, which is what keeps concurrent client senders
/// from ever interleaving partial commands — all writes flow through the
/// single pump task calling this function.
///
/// # Errors
///
/// Returns [`WriteError`] when the socket is closed or broken.
pub async fn write_command_line(
    write_half: &mut OwnedWriteHalf,
    command: &Command,
) -> Result<(), WriteError> {
    write_half
        .write_all(command.encode().as_bytes())
        .await
        .map_err(|source| WriteError { source })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
