//! Application layer for motor-web-bridge.
//!
//! The application layer owns the business logic of one bridging session:
//! the session state machine, the authentication gate, command validation
//! and relay, telemetry fan-out, and the ring buffer.  It knows *what* to do
//! and delegates *how* (sockets, WebSocket framing, timers) to the
//! infrastructure layer.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or listening for connections (infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)
//! - The reconnection delay loop (infrastructure::reconnect)

pub mod session;

pub use session::{AuthError, Outbound, RelayError, SessionBridge, SessionState};
