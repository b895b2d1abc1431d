//! Domain module: pure business-logic types with no I/O dependencies.

pub mod window;

pub use window::{TelemetrySample, TelemetryWindow, DEFAULT_WINDOW_CAPACITY};
