//! Domain layer for motor-web-bridge.
//!
//! Pure business-logic types with no dependencies on I/O, networking, or
//! async runtimes: the client-facing message language, the bridge
//! configuration, and the close-code constants.  Everything here is
//! testable without a socket in sight.

pub mod config;
pub mod messages;

pub use config::{BridgeConfig, DeviceEndpoint};
pub use messages::{
    classify, BridgeEvent, ClientMessage, ControlEnvelope, MalformedEnvelope,
    CLOSE_DEVICE_ERROR, CLOSE_GOING_AWAY, CLOSE_UNAUTHORIZED,
};
