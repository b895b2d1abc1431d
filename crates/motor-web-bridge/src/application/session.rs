//! The session bridge: one device connection, many client observers.
//!
//! A single [`SessionBridge`] exists per bridge process.  It exclusively
//! owns the device connection (through the command channel installed by the
//! supervisor), applies the authentication gate, fans telemetry out to every
//! connected client, and keeps the rolling telemetry window.
//!
//! # State machine
//!
//! ```text
//! Idle → AwaitingAuth → Bridging → Closing → Closed
//!             │             │
//!             └──→ Error ←──┘        (auth failure / device transport failure)
//! ```
//!
//! - `Idle → AwaitingAuth`: first client message arrives.
//! - `AwaitingAuth → Bridging`: token accepted AND device opened (in direct
//!   mode the token step is skipped entirely).
//! - `AwaitingAuth → Error → Idle`: token mismatch; the offending client is
//!   closed with the unauthorized code and no retry happens.
//! - `Bridging → Error`: device transport failure; the reconnection
//!   supervisor takes over and `Bridging` is restored on success.
//! - `Closing → Closed`: explicit shutdown; never resurrected.
//!
//! The current state is always read fresh from the shared cell — retry and
//! relay decisions are never made against a value captured earlier.
//!
//! # Ordering guarantees
//!
//! Device writes are serialized through one `mpsc` channel drained by the
//! single pump task, so concurrent client senders can never interleave
//! partial commands.  Telemetry goes out through one `broadcast` channel,
//! so every observer sees samples in device-arrival order.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use motor_core::{
    decode_telemetry, Command, DecodedTelemetry, InvalidCommand, TelemetrySample, TelemetryWindow,
};

use crate::domain::config::{BridgeConfig, DeviceEndpoint};
use crate::domain::messages::{BridgeEvent, CLOSE_DEVICE_ERROR, CLOSE_GOING_AWAY};

/// Fan-out buffer depth per client.  A dashboard that falls this far behind
/// starts losing the oldest frames (it will be told via a lag warning in the
/// forwarder, not by session teardown).
const BROADCAST_CAPACITY: usize = 256;

/// Command queue depth between client handlers and the device pump.
const COMMAND_QUEUE_CAPACITY: usize = 64;

// ── State & message types ─────────────────────────────────────────────────────

/// Lifecycle state of the (single) session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No client has spoken yet; no device connection exists.
    Idle,
    /// A client is talking but the device session is not up yet.
    AwaitingAuth,
    /// Device connected; telemetry and commands are flowing.
    Bridging,
    /// Explicit shutdown in progress.
    Closing,
    /// Fully torn down.
    Closed,
    /// Device transport failure; the supervisor is driving reconnection.
    Error,
}

/// One item on the session's fan-out channel, consumed by every client
/// forwarder task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized JSON frame (telemetry object or tagged event).
    Frame(String),
    /// Terminal: forwarders send any pending frame, then close the client
    /// socket with this code.
    Close {
        /// WebSocket close code (see `domain::messages` constants).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

// ── Error types ───────────────────────────────────────────────────────────────

/// Authentication failure.  Fatal to the client's attempt (closed with the
/// unauthorized code, never retried by the bridge), not to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The envelope's token does not exactly match the configured secret
    /// (or no secret is configured at all).
    #[error("authentication token mismatch")]
    TokenMismatch,
}

/// Failure to relay a client command to the device.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The command line failed validation; nothing was written.
    #[error(transparent)]
    Invalid(#[from] InvalidCommand),

    /// No device session has been established yet.
    #[error("no active device session")]
    NoSession,

    /// The device connection is down (reconnection in progress) or the
    /// command queue is saturated.
    #[error("device unavailable; reconnection in progress")]
    DeviceUnavailable,
}

// ── The session bridge ────────────────────────────────────────────────────────

/// Owns the one active bridging session.
///
/// Created once at startup, wrapped in an `Arc`, and shared by every client
/// handler task plus the device supervisor.
pub struct SessionBridge {
    id: Uuid,
    config: Arc<BridgeConfig>,
    state: Mutex<SessionState>,
    /// Sender half of the device command queue; `Some` while a device
    /// supervisor task is alive.  The session never writes to the socket
    /// itself — exclusive ownership of the connection stays in the pump.
    device_tx: Mutex<Option<mpsc::Sender<Command>>>,
    outbound_tx: broadcast::Sender<Outbound>,
    /// Single-writer (device pump) / multiple-reader (snapshots) window.
    window: Mutex<TelemetryWindow>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionBridge {
    /// Creates the session in `Idle` with an empty telemetry window.
    pub fn new(config: Arc<BridgeConfig>) -> Arc<Self> {
        let (outbound_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let capacity = config.window_capacity;
        Arc::new(Self {
            id: Uuid::new_v4(),
            config,
            state: Mutex::new(SessionState::Idle),
            device_tx: Mutex::new(None),
            outbound_tx,
            window: Mutex::new(TelemetryWindow::new(capacity)),
            shutdown_tx,
        })
    }

    /// This session's identifier (used in log messages).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The shared bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Reads the current state, fresh.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != next {
            debug!(session = %self.id, "session state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// `true` once an explicit shutdown has begun; a deliberately closed
    /// session must never be resurrected by a pending reconnect.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self.state(), SessionState::Closing | SessionState::Closed)
    }

    // ── Fan-out ───────────────────────────────────────────────────────────────

    /// Subscribes a client forwarder to the fan-out channel.  The receiver
    /// sees every item broadcast after this call, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }

    /// A watch on the shutdown flag, for tasks that must cancel promptly.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcasts a lifecycle event to every connected client.
    pub fn broadcast_event(&self, event: &BridgeEvent) {
        // A send error only means no client is currently subscribed.
        let _ = self.outbound_tx.send(Outbound::Frame(event.to_json()));
    }

    fn broadcast_close(&self, code: u16, reason: &str) {
        let _ = self.outbound_tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    // ── Client-driven transitions ─────────────────────────────────────────────

    /// Records that a client message arrived; the first one moves the
    /// session out of `Idle`.
    pub fn note_client_message(&self) {
        let mut state = lock(&self.state);
        if *state == SessionState::Idle {
            debug!(session = %self.id, "first client message; session state Idle -> AwaitingAuth");
            *state = SessionState::AwaitingAuth;
        }
    }

    /// Checks an envelope token against the configured secret.
    ///
    /// Plain equality is sufficient at this scale; there is no
    /// timing-attack requirement.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenMismatch`] on mismatch, and always when no secret
    /// is configured (direct mode is the only tokenless way in).
    pub fn verify_token(&self, supplied: &str) -> Result<(), AuthError> {
        match self.config.auth_token.as_deref() {
            Some(expected) if expected == supplied => Ok(()),
            _ => Err(AuthError::TokenMismatch),
        }
    }

    /// Records an authentication failure.  If no device session exists the
    /// state passes through `Error` and settles back in `Idle`, so a later
    /// client can still authenticate.
    pub fn auth_failed(&self) {
        warn!(session = %self.id, "authentication failed; closing client unauthorized");
        let has_device = lock(&self.device_tx).is_some();
        if !has_device && !self.is_shutting_down() {
            self.set_state(SessionState::Error);
            self.set_state(SessionState::Idle);
        }
    }

    // ── Device lifecycle (called by the supervisor) ───────────────────────────

    /// Installs the device command channel if none exists yet.
    ///
    /// Returns `false` when a device session is already running — callers
    /// must then *not* spawn a second supervisor.  This is the "at most one
    /// outstanding device connection" guarantee.
    pub fn try_install_device_channel(&self, tx: mpsc::Sender<Command>) -> bool {
        let mut slot = lock(&self.device_tx);
        if slot.is_some() || self.is_shutting_down() {
            return false;
        }
        *slot = Some(tx);
        true
    }

    /// Creates the command queue used between client handlers and the pump.
    pub fn command_queue() -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
        mpsc::channel(COMMAND_QUEUE_CAPACITY)
    }

    /// The device connection is up: enter `Bridging` and tell the clients.
    pub fn mark_bridging(&self, endpoint: DeviceEndpoint) {
        if self.is_shutting_down() {
            return;
        }
        info!(session = %self.id, %endpoint, "device session bridging");
        self.set_state(SessionState::Bridging);
        self.broadcast_event(&BridgeEvent::ConnectionEstablished);
    }

    /// The device transport failed: enter `Error` and tell the clients.
    pub fn mark_device_error(&self, reason: &str) {
        if self.is_shutting_down() {
            return;
        }
        warn!(session = %self.id, reason, "device connection lost");
        self.set_state(SessionState::Error);
        self.broadcast_event(&BridgeEvent::ConnectionLost {
            reason: reason.to_string(),
        });
    }

    /// The supervisor has fully stopped; clear the device channel and the
    /// window (no persistence across sessions).
    pub fn device_session_closed(&self) {
        lock(&self.device_tx).take();
        lock(&self.window).clear();
        let next = if self.is_shutting_down() {
            SessionState::Closed
        } else {
            SessionState::Idle
        };
        self.set_state(next);
        info!(session = %self.id, "device session closed");
    }

    // ── Relay paths ───────────────────────────────────────────────────────────

    /// Validates and queues one client command line for the device.
    ///
    /// Returns the parsed command on success so the caller can log it.
    ///
    /// # Errors
    ///
    /// - [`RelayError::Invalid`] — validation failed; nothing is queued.
    /// - [`RelayError::NoSession`] — no device session established.
    /// - [`RelayError::DeviceUnavailable`] — connection down or queue full.
    pub fn relay_command(&self, raw: &str) -> Result<Command, RelayError> {
        // Reject before anything touches the network.
        let command = Command::parse(raw)?;

        if self.state() == SessionState::Error {
            return Err(RelayError::DeviceUnavailable);
        }

        let slot = lock(&self.device_tx);
        let tx = slot.as_ref().ok_or(RelayError::NoSession)?;
        tx.try_send(command.clone())
            .map_err(|_| RelayError::DeviceUnavailable)?;
        Ok(command)
    }

    /// Ingests one raw device line: decode, stamp, record, fan out.
    ///
    /// Structured JSON becomes a measurement object; anything else is
    /// downgraded to an opaque status (never an error — the dashboard must
    /// always get a status update).
    pub fn ingest_device_line(&self, line: &str) {
        let update = match decode_telemetry(line) {
            DecodedTelemetry::Structured(update) => update,
            DecodedTelemetry::Opaque(raw) => {
                debug!(session = %self.id, "unstructured device payload: {raw:?}");
                motor_core::TelemetryUpdate::status_only(raw)
            }
        };

        let sample = TelemetrySample::at(now_ms(), update.clone());
        lock(&self.window).push(sample);

        match serde_json::to_string(&update) {
            Ok(json) => {
                let _ = self.outbound_tx.send(Outbound::Frame(json));
            }
            Err(e) => warn!(session = %self.id, "telemetry serialization failed: {e}"),
        }
    }

    /// An ordered copy of the telemetry window for the presentation layer.
    pub fn snapshot(&self) -> Vec<TelemetrySample> {
        lock(&self.window).snapshot()
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Explicitly ends the session: notifies every client, closes them with
    /// the going-away code, and signals the supervisor (cancelling any
    /// pending reconnection attempt).  Idempotent.
    pub fn shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        info!(session = %self.id, "session shutdown requested");
        self.set_state(SessionState::Closing);

        // Clients first learn why, then get the close frame.
        self.broadcast_event(&BridgeEvent::DeviceSessionEnded);
        self.broadcast_close(CLOSE_GOING_AWAY, "device session ended");

        let had_device = lock(&self.device_tx).is_some();
        let _ = self.shutdown_tx.send(true);

        // With no supervisor alive there is nobody left to finish the
        // teardown, so do it inline.
        if !had_device {
            self.device_session_closed();
        }
    }

    /// Unrecoverable session failure: close every client with the
    /// device-error code and stop.  Unlike transport failures this is not
    /// retried — the bridge itself broke, not the wire.
    pub fn fail_session(&self, reason: &str) {
        if self.is_shutting_down() {
            return;
        }
        warn!(session = %self.id, reason, "device session failed");
        self.set_state(SessionState::Closing);
        self.broadcast_close(CLOSE_DEVICE_ERROR, reason);
        let _ = self.shutdown_tx.send(true);
    }
}

/// Locks a session mutex, recovering the data if a panicking thread
/// poisoned it.  Every critical section here leaves its value consistent
/// before unlocking, so the poison flag carries nothing worth crashing
/// the bridge over.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Milliseconds since the Unix epoch, for sample timestamps.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
