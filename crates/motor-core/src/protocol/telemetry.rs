//! Inbound telemetry decoder for the device data channel.
//!
//! The device reports measurements as newline-framed payloads that are
//! either a JSON object with any subset of the keys
//! `{distance, angle, speed, status}`, or a freeform status string such as
//! `MOTOR READY`.  Both shapes are legal; a payload that fails the JSON
//! parse is *downgraded* to an opaque status rather than treated as an
//! error, so the dashboard always gets something to display.
//!
//! Partial updates are the norm: a message carrying only `distance` leaves
//! angle, speed, and status at their previous consumer-side values.

use serde::{Deserialize, Serialize};

use crate::protocol::command::MAX_ANGLE_DEGREES;

// ── Update type ───────────────────────────────────────────────────────────────

/// A decoded telemetry update; every field is optional.
///
/// Serializes back to the client-facing wire object with absent fields
/// omitted, e.g. `{"distance":12.35,"speed":40}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryUpdate {
    /// Measured distance in centimetres, rounded to 2 decimal places.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Current shaft angle in degrees, `0..=360`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<u16>,
    /// Motor speed as a percentage, `0..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    /// Freeform device status text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TelemetryUpdate {
    /// An update carrying only a status string.  Used for opaque payloads.
    pub fn status_only(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    /// `true` when no field is set (a JSON object with no recognized keys).
    pub fn is_empty(&self) -> bool {
        self.distance.is_none()
            && self.angle.is_none()
            && self.speed.is_none()
            && self.status.is_none()
    }
}

/// The outcome of decoding one device payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedTelemetry {
    /// The payload was a JSON object; recognized keys were extracted.
    Structured(TelemetryUpdate),
    /// The payload was not valid JSON; the raw text is surfaced as a status.
    Opaque(String),
}

impl DecodedTelemetry {
    /// Collapses both variants into a [`TelemetryUpdate`] for observers.
    pub fn into_update(self) -> TelemetryUpdate {
        match self {
            DecodedTelemetry::Structured(update) => update,
            DecodedTelemetry::Opaque(raw) => TelemetryUpdate::status_only(raw),
        }
    }
}

// ── Raw wire shape ────────────────────────────────────────────────────────────

/// The loosely-typed JSON shape the device actually sends.
///
/// Numbers arrive as arbitrary JSON numbers; the strictly-typed
/// [`TelemetryUpdate`] fields are derived from these with the same
/// conventions the original dashboard applied (`toFixed(2)` for distance,
/// `parseInt` truncation for angle and speed).
#[derive(Debug, Deserialize)]
struct RawTelemetry {
    distance: Option<f64>,
    angle: Option<f64>,
    speed: Option<f64>,
    status: Option<String>,
}

// ── Decoder ───────────────────────────────────────────────────────────────────

/// Decodes one newline-framed device payload.
///
/// Attempts a structured JSON parse first; any parse failure downgrades the
/// whole payload to [`DecodedTelemetry::Opaque`].  Unrecognized JSON keys
/// are ignored.  Numeric fields outside their representable range are
/// dropped (the field stays `None`) rather than failing the message.
///
/// # Example
///
/// ```rust
/// use motor_core::{decode_telemetry, DecodedTelemetry};
///
/// let decoded = decode_telemetry(r#"{"distance":12.345}"#);
/// let DecodedTelemetry::Structured(update) = decoded else { unreachable!() };
/// assert_eq!(update.distance, Some(12.35));
/// ```
pub fn decode_telemetry(payload: &str) -> DecodedTelemetry {
    let trimmed = payload.trim_end_matches(['\r', '\n']);

    let raw: RawTelemetry = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(_) => return DecodedTelemetry::Opaque(trimmed.to_string()),
    };

    DecodedTelemetry::Structured(TelemetryUpdate {
        distance: raw.distance.map(round_to_2dp),
        angle: raw.angle.and_then(truncate_angle),
        speed: raw.speed.and_then(truncate_speed),
        status: raw.status,
    })
}

/// Rounds to 2 decimal places, half away from zero (`12.345` → `12.35`).
fn round_to_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Truncates a JSON number to a device angle; out-of-range values drop the
/// field.
fn truncate_angle(value: f64) -> Option<u16> {
    let truncated = value.trunc();
    if (0.0..=f64::from(MAX_ANGLE_DEGREES)).contains(&truncated) {
        Some(truncated as u16)
    } else {
        None
    }
}

/// Truncates a JSON number to a speed percentage; out-of-range values drop
/// the field.
fn truncate_speed(value: f64) -> Option<u8> {
    let truncated = value.trunc();
    if (0.0..=100.0).contains(&truncated) {
        Some(truncated as u8)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn structured(payload: &str) -> TelemetryUpdate {
        match decode_telemetry(payload) {
            DecodedTelemetry::Structured(update) => update,
            other => panic!("expected structured telemetry, got {other:?}"),
        }
    }

    #[test]
    fn test_full_telemetry_object_decodes() {
        // Arrange / Act
        let update = structured(r#"{"distance":25.5,"angle":180,"speed":40,"status":"RUN"}"#);

        // Assert
        assert_eq!(update.distance, Some(25.5));
        assert_eq!(update.angle, Some(180));
        assert_eq!(update.speed, Some(40));
        assert_eq!(update.status.as_deref(), Some("RUN"));
    }

    #[test]
    fn test_distance_rounds_to_two_decimals() {
        let update = structured(r#"{"distance":12.345}"#);
        assert_eq!(update.distance, Some(12.35));
    }

    #[test]
    fn test_partial_update_leaves_other_fields_absent() {
        // A distance-only message must not fabricate angle/speed/status.
        let update = structured(r#"{"distance":12.345}"#);
        assert_eq!(update.angle, None);
        assert_eq!(update.speed, None);
        assert_eq!(update.status, None);
    }

    #[test]
    fn test_angle_and_speed_truncate_like_parse_int() {
        let update = structured(r#"{"angle":270.9,"speed":33.7}"#);
        assert_eq!(update.angle, Some(270));
        assert_eq!(update.speed, Some(33));
    }

    #[test]
    fn test_out_of_range_numeric_fields_are_dropped() {
        // Arrange: angle beyond 360, speed beyond 100, both negative-capable
        let update = structured(r#"{"angle":400,"speed":-3,"distance":1.0}"#);

        // Assert: bad fields dropped, good fields kept
        assert_eq!(update.angle, None);
        assert_eq!(update.speed, None);
        assert_eq!(update.distance, Some(1.0));
    }

    #[test]
    fn test_unrecognized_keys_are_ignored() {
        let update = structured(r#"{"distance":2.0,"firmware":"1.2.3","rssi":-40}"#);
        assert_eq!(update.distance, Some(2.0));
    }

    #[test]
    fn test_non_json_payload_downgrades_to_opaque_status() {
        // Arrange / Act
        let decoded = decode_telemetry("MOTOR READY");

        // Assert: surfaced, not rejected
        assert_eq!(decoded, DecodedTelemetry::Opaque("MOTOR READY".to_string()));
        assert_eq!(
            decoded.into_update().status.as_deref(),
            Some("MOTOR READY")
        );
    }

    #[test]
    fn test_truncated_json_downgrades_to_opaque_status() {
        let decoded = decode_telemetry(r#"{"distance":12."#);
        assert!(matches!(decoded, DecodedTelemetry::Opaque(_)));
    }

    #[test]
    fn test_line_framing_is_stripped() {
        let update = structured("{\"speed\":10}\r\n");
        assert_eq!(update.speed, Some(10));
        // Opaque payloads also lose the frame terminator only.
        assert_eq!(
            decode_telemetry("READY\n"),
            DecodedTelemetry::Opaque("READY".to_string())
        );
    }

    #[test]
    fn test_update_serializes_subset_wire_object() {
        // Arrange
        let update = TelemetryUpdate {
            distance: Some(12.35),
            speed: Some(40),
            ..TelemetryUpdate::default()
        };

        // Act
        let json = serde_json::to_string(&update).unwrap();

        // Assert: absent fields are omitted entirely
        assert_eq!(json, r#"{"distance":12.35,"speed":40}"#);
    }

    #[test]
    fn test_empty_object_is_structured_and_empty() {
        let update = structured("{}");
        assert!(update.is_empty());
    }
}
