//! motor-web-bridge library crate.
//!
//! This crate bridges browser dashboard clients to a motor-control embedded
//! device: JSON over WebSocket on one side, plain-text command lines and
//! JSON telemetry lines over TCP on the other.
//!
//! # Architecture
//!
//! ```text
//! Browser dashboards (JSON over WebSocket, 0..N clients)
//!         ↕
//! [motor-web-bridge]
//!   ├── domain/           Pure types: control envelope, events, BridgeConfig
//!   ├── application/      The session bridge: auth gate, state machine,
//!   │                     command relay, telemetry fan-out, ring buffer
//!   └── infrastructure/
//!         ├── ws_server/   WebSocket accept loop (tokio-tungstenite)
//!         ├── device_conn/ TCP line transport to the device
//!         └── reconnect/   Fixed-delay device reconnection supervisor
//!         ↕
//! Motor-control device (text lines over TCP, exactly one connection)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async, no sockets).
//! - `application` depends on `domain` and `motor-core` only, plus tokio's
//!   synchronization primitives (channels and locks, never sockets).
//! - `infrastructure` depends on everything else plus `tokio` networking and
//!   `tungstenite`.

/// Domain layer: pure business-logic types (no I/O).
pub mod domain;

/// Application layer: the session bridge and its state machine.
pub mod application;

/// Infrastructure layer: WebSocket server, device TCP transport, supervisor.
pub mod infrastructure;
