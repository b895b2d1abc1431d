//! Outbound command codec for the device control channel.
//!
//! The device accepts a tiny plain-ASCII command language, one command per
//! line:
//!
//! ```text
//! START\n        run at maximum power
//! STOP\n         stop the motor
//! DISTANCE\n     switch to distance-keeping mode
//! ANGLE:<n>\n    rotate to the absolute angle <n>, 0–360 degrees
//! ```
//!
//! Validation is the *caller's* responsibility, not a network round-trip:
//! a malformed command must be rejected here, before anything is written to
//! the device socket.  [`Command::parse`] therefore refuses unknown verbs
//! and out-of-range or non-integer angle arguments.

use std::fmt;

use thiserror::Error;

/// Largest angle argument the device accepts, in degrees (inclusive).
pub const MAX_ANGLE_DEGREES: u16 = 360;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors produced when a client-supplied command line cannot be encoded.
///
/// These are client input errors: the session continues, the offending
/// command is rejected, and nothing is written to the device.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidCommand {
    /// The command verb is not one the device understands.
    #[error("unknown command: {0:?}")]
    Unknown(String),

    /// The `ANGLE:` argument is not a base-10 integer.
    #[error("angle argument is not an integer: {0:?}")]
    AngleNotAnInteger(String),

    /// The `ANGLE:` argument parsed but lies outside `[0, 360]`.
    #[error("angle {0} out of range (expected 0–{MAX_ANGLE_DEGREES})")]
    AngleOutOfRange(i64),
}

// ── Command type ──────────────────────────────────────────────────────────────

/// A validated command ready to be written to the device.
///
/// Constructing a `Command` is the proof that the line is well-formed; the
/// transport layer only ever sees the output of [`Command::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the motor at maximum power.
    Start,
    /// Stop the motor.
    Stop,
    /// Switch the controller into distance-keeping mode.
    Distance,
    /// Rotate to an absolute angle.  The value is guaranteed to be in
    /// `[0, 360]` by [`Command::angle`] / [`Command::parse`].
    Angle(u16),
}

impl Command {
    /// Builds an `Angle` command, validating the range.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCommand::AngleOutOfRange`] when `degrees` is not in
    /// `[0, 360]`.
    pub fn angle(degrees: i64) -> Result<Self, InvalidCommand> {
        if !(0..=i64::from(MAX_ANGLE_DEGREES)).contains(&degrees) {
            return Err(InvalidCommand::AngleOutOfRange(degrees));
        }
        // The range check above guarantees the cast is lossless.
        Ok(Command::Angle(degrees as u16))
    }

    /// Parses a raw client command line into a validated [`Command`].
    ///
    /// Surrounding whitespace (including the trailing newline of a
    /// line-framed transport) is ignored.  The verbs are case-sensitive,
    /// exactly as the device firmware matches them.
    ///
    /// # Errors
    ///
    /// - [`InvalidCommand::Unknown`] for an unrecognized verb.
    /// - [`InvalidCommand::AngleNotAnInteger`] when the `ANGLE:` argument is
    ///   not a base-10 integer.
    /// - [`InvalidCommand::AngleOutOfRange`] when it is an integer outside
    ///   `[0, 360]`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use motor_core::Command;
    ///
    /// assert_eq!(Command::parse("ANGLE:270").unwrap(), Command::Angle(270));
    /// assert!(Command::parse("ANGLE:361").is_err());
    /// ```
    pub fn parse(line: &str) -> Result<Self, InvalidCommand> {
        let line = line.trim();
        match line {
            "START" => Ok(Command::Start),
            "STOP" => Ok(Command::Stop),
            "DISTANCE" => Ok(Command::Distance),
            _ => {
                if let Some(arg) = line.strip_prefix("ANGLE:") {
                    let degrees: i64 = arg
                        .trim()
                        .parse()
                        .map_err(|_| InvalidCommand::AngleNotAnInteger(arg.to_string()))?;
                    Command::angle(degrees)
                } else {
                    Err(InvalidCommand::Unknown(line.to_string()))
                }
            }
        }
    }

    /// Encodes the command as the ASCII line written to the device,
    /// including the terminating newline.
    pub fn encode(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("START"),
            Command::Stop => f.write_str("STOP"),
            Command::Distance => f.write_str("DISTANCE"),
            Command::Angle(degrees) => write!(f, "ANGLE:{degrees}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
