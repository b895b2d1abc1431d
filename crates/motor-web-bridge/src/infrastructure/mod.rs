//! Infrastructure layer for motor-web-bridge.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browser dashboards and driving the TCP connection to the motor
//! device.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener for browser WebSocket connections
//! - Performing the WebSocket HTTP upgrade handshake
//! - Dialing, pumping, and reconnecting the device TCP connection
//! - Spawning per-client Tokio tasks
//! - Handling the graceful shutdown signal
//!
//! # What does NOT belong here?
//!
//! - The session state machine and auth gate (application layer)
//! - Message and command type definitions (domain layer / motor-core)
//! - Configuration parsing (done in `main.rs`)

pub mod device_conn;
pub mod reconnect;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use ws_server::{bind_server, run_server, serve};
