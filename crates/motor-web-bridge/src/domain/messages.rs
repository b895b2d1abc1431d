//! JSON message types for the browser-facing WebSocket protocol.
//!
//! The device speaks plain text lines; browsers speak JSON naturally.  The
//! client→bridge leg therefore carries a small JSON control envelope for
//! session setup, and everything else is raw command pass-through:
//!
//! ```text
//! Client → Bridge:  {"type":"INIT_CONNECTION","deviceIp":"…","authToken":"…"}
//!                   or a raw command line ("START", "ANGLE:90", …)
//! Bridge → Client:  telemetry objects ({"distance":12.35,"speed":40}) and
//!                   tagged lifecycle events ({"type":"connectionLost",…})
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute produces the `"type"`
//! discriminant; fields the bridge does not recognize are ignored, so older
//! bridges tolerate newer dashboards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Close codes ───────────────────────────────────────────────────────────────
//
// Unauthorized and device-error closures carry distinct codes so the client
// can decide between prompting for re-auth and silently retrying.

/// Close code for an authentication failure (policy violation).
pub const CLOSE_UNAUTHORIZED: u16 = 1008;

/// Close code for an unrecoverable device error.
pub const CLOSE_DEVICE_ERROR: u16 = 1011;

/// Close code for graceful bridge shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

// ── Client → Bridge ───────────────────────────────────────────────────────────

/// The JSON control envelope a client may send to the bridge.
///
/// Only session setup uses the envelope; every other client message is a
/// raw device command relayed as-is (see [`ClientMessage::Command`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlEnvelope {
    /// Establish the device session: which device to dial and the shared
    /// secret proving the client may do so.
    #[serde(rename = "INIT_CONNECTION")]
    InitConnection {
        /// IP address of the target device.  The device port is fixed by
        /// bridge configuration.
        #[serde(rename = "deviceIp")]
        device_ip: String,
        /// Shared secret; must exactly match the bridge's configured token.
        #[serde(rename = "authToken")]
        auth_token: String,
    },
}

/// One client text frame, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A well-formed control envelope.
    Envelope(ControlEnvelope),
    /// Anything else: a raw command line to validate and pass through.
    Command(String),
}

/// A frame that *claims* to be an `INIT_CONNECTION` envelope but is missing
/// required fields (or carries wrongly-typed ones).  The session is not
/// established; the client gets an error notification and may retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed INIT_CONNECTION envelope: {reason}")]
pub struct MalformedEnvelope {
    /// Human-readable description of what was wrong.
    pub reason: String,
}

/// Classifies a client text frame.
///
/// - Valid envelope → [`ClientMessage::Envelope`].
/// - A JSON object tagged `"type":"INIT_CONNECTION"` that fails to
///   deserialize (missing `deviceIp`/`authToken`, wrong field types) →
///   [`MalformedEnvelope`].
/// - Everything else — non-JSON text, JSON of any other shape — →
///   [`ClientMessage::Command`] pass-through.
///
/// Unrecognized fields inside a valid envelope are ignored.
pub fn classify(text: &str) -> Result<ClientMessage, MalformedEnvelope> {
    // Non-JSON is a raw command by definition.
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Ok(ClientMessage::Command(text.to_string())),
    };

    let claims_init = value
        .as_object()
        .and_then(|map| map.get("type"))
        .and_then(|tag| tag.as_str())
        == Some("INIT_CONNECTION");

    if !claims_init {
        // JSON, but not a control envelope: still a pass-through.
        return Ok(ClientMessage::Command(text.to_string()));
    }

    serde_json::from_value::<ControlEnvelope>(value)
        .map(ClientMessage::Envelope)
        .map_err(|e| MalformedEnvelope {
            reason: e.to_string(),
        })
}

// ── Bridge → Client ───────────────────────────────────────────────────────────

/// Lifecycle notifications the bridge sends to clients.
///
/// Telemetry is *not* a variant here: decoded samples are forwarded as the
/// bare measurement object (`{"distance":…,"angle":…}`) with no `"type"`
/// tag, exactly the shape the device produced.  The dashboard already
/// branches on the presence of measurement keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    /// The device connection is up (sent on first connect and after every
    /// successful reconnect).
    #[serde(rename = "connectionEstablished")]
    ConnectionEstablished,

    /// The device connection was lost; the bridge is retrying.
    #[serde(rename = "connectionLost")]
    ConnectionLost {
        /// Human-readable failure description.
        reason: String,
    },

    /// The device session was explicitly ended; no reconnection will occur.
    #[serde(rename = "deviceSessionEnded")]
    DeviceSessionEnded,

    /// A client-visible error (rejected command, malformed envelope, …).
    /// Sent only to the originating client; the session continues.
    #[serde(rename = "error")]
    Error {
        /// Human-readable error description.
        message: String,
    },
}

impl BridgeEvent {
    /// Serializes the event to its wire JSON.
    ///
    /// Serialization of these variants cannot fail (no non-string map keys,
    /// no non-finite floats), so this is infallible by construction.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // Unreachable for this type; keep a valid frame just in case.
            r#"{"type":"error","message":"internal serialization error"}"#.to_string()
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
