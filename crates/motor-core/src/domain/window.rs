//! The telemetry ring buffer: a fixed-capacity rolling window of the most
//! recent samples.
//!
//! The dashboard chart shows the last 50 measurements; everything older is
//! discarded.  The window is insertion-ordered (arrival order) and evicts
//! from the head once capacity is exceeded — a plain FIFO, not a
//! priority structure.
//!
//! The window itself is a pure single-threaded container.  The bridge wraps
//! it in a `Mutex` to get the single-writer/multiple-reader pattern it
//! needs; [`TelemetryWindow::snapshot`] returns a copy precisely so a
//! reader's iteration can never be invalidated by a concurrent push.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::protocol::telemetry::TelemetryUpdate;

/// Default number of samples retained, matching the dashboard chart depth.
pub const DEFAULT_WINDOW_CAPACITY: usize = 50;

// ── Sample type ───────────────────────────────────────────────────────────────

/// One telemetry measurement, stamped at arrival time.
///
/// The fields mirror [`TelemetryUpdate`]: any subset may be present, and an
/// absent field means "unchanged since the previous sample" to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Arrival time, milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Measured distance in centimetres, rounded to 2 decimal places.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Shaft angle in degrees, `0..=360`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub angle: Option<u16>,
    /// Motor speed percentage, `0..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    /// Freeform device status text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TelemetrySample {
    /// Stamps a decoded update with its arrival time.
    pub fn at(timestamp_ms: u64, update: TelemetryUpdate) -> Self {
        Self {
            timestamp_ms,
            distance: update.distance,
            angle: update.angle,
            speed: update.speed,
            status: update.status,
        }
    }

    /// The measurement fields without the timestamp, in the shape clients
    /// receive on the wire.
    pub fn update(&self) -> TelemetryUpdate {
        TelemetryUpdate {
            distance: self.distance,
            angle: self.angle,
            speed: self.speed,
            status: self.status.clone(),
        }
    }
}

// ── Window type ───────────────────────────────────────────────────────────────

/// Fixed-capacity, insertion-ordered rolling window of telemetry samples.
///
/// Invariant: `len() <= capacity` at all times; iteration order equals
/// arrival order, oldest first.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TelemetryWindow {
    /// Creates an empty window retaining at most `capacity` samples.
    ///
    /// A capacity of zero is clamped to one so the window is never a black
    /// hole that silently swallows every sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// The configured retention limit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends a sample at the tail, evicting from the head when the window
    /// is full.
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Returns an ordered copy of the current contents, oldest first.
    ///
    /// Returning a copy (rather than a borrow) means the presentation layer
    /// can iterate at leisure while the device-read path keeps pushing.
    pub fn snapshot(&self) -> Vec<TelemetrySample> {
        self.samples.iter().cloned().collect()
    }

    /// Discards all samples.  Called on session teardown; the window has no
    /// persistence.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for TelemetryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
