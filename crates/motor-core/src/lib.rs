//! # motor-core
//!
//! Shared library for the motor WebSocket bridge containing the device
//! protocol codec and the telemetry domain types.
//!
//! This crate is used by the bridge binary and by anything else that needs to
//! speak the device's wire language.  It has zero dependencies on OS APIs,
//! async runtimes, or network sockets.
//!
//! # What lives here
//!
//! - **`protocol`** – The two halves of the device wire language.  Outbound:
//!   plain ASCII command lines (`START`, `STOP`, `DISTANCE`, `ANGLE:<n>`),
//!   validated before they ever reach a socket.  Inbound: telemetry lines
//!   that are either a JSON object with optional measurement keys or an
//!   opaque freeform status string.
//!
//! - **`domain`** – Pure business logic with no I/O.  The most important
//!   piece is the [`TelemetryWindow`]: a fixed-capacity rolling window of
//!   the most recent telemetry samples, consumed by the presentation layer.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `motor_core::Command` instead of `motor_core::protocol::command::Command`.
pub use domain::window::{TelemetrySample, TelemetryWindow, DEFAULT_WINDOW_CAPACITY};
pub use protocol::command::{Command, InvalidCommand, MAX_ANGLE_DEGREES};
pub use protocol::telemetry::{decode_telemetry, DecodedTelemetry, TelemetryUpdate};
