//! Protocol module containing the outbound command codec and the inbound
//! telemetry decoder.

pub mod command;
pub mod telemetry;

pub use command::{Command, InvalidCommand};
pub use telemetry::{decode_telemetry, DecodedTelemetry, TelemetryUpdate};
