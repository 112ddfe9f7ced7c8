//! The `Reading` type and kind composition.
//!
//! A `Reading` is the atomic unit flowing through the pipeline: a UTC
//! timestamp with microsecond resolution, a namespaced kind string, and an
//! optional numeric value.  A missing value is meaningful (self-observation
//! gauges are persisted with only a timestamp when there is not enough data
//! to compute them), so absence is encoded as `None`, never as `0.0`.
//!
//! # Kind namespace
//! The fully qualified kind is `<instance-prefix><category-prefix><name>`,
//! where the category prefix is [`READING_PREFIX`] for sensor values and
//! [`CONNECTION_PREFIX`] for connection quality gauges.  The instance prefix
//! tags the logger instance so several loggers can share one store.

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// Kind prefixes
// ---------------------------------------------------------------------------

/// Category prefix for sensor readings.
pub const READING_PREFIX: &str = "reading:";

/// Category prefix for connection quality gauges.
pub const CONNECTION_PREFIX: &str = "connection:";

/// Compose the store kind for a sensor reading.
pub fn reading_kind(instance_prefix: &str, name: &str) -> String {
    format!("{instance_prefix}{READING_PREFIX}{name}")
}

/// Compose the store kind for a connection quality gauge.
pub fn connection_kind(instance_prefix: &str, name: &str) -> String {
    format!("{instance_prefix}{CONNECTION_PREFIX}{name}")
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// One timestamped datapoint, immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    kind: String,
    value: Option<f64>,
}

impl Reading {
    /// Construct a reading with a numeric value.
    ///
    /// The timestamp is truncated to microsecond resolution; sub-microsecond
    /// precision would not survive the disk buffer round trip.
    pub fn new(timestamp: DateTime<Utc>, kind: String, value: f64) -> Reading {
        debug_assert!(!kind.is_empty(), "reading kind must be non-empty");
        debug_assert!(value.is_finite(), "reading value must be finite");
        Reading {
            timestamp: truncate_to_micros(timestamp),
            kind,
            value: Some(value),
        }
    }

    /// Construct a reading that carries only a timestamp.
    pub fn absent(timestamp: DateTime<Utc>, kind: String) -> Reading {
        debug_assert!(!kind.is_empty(), "reading kind must be non-empty");
        Reading {
            timestamp: truncate_to_micros(timestamp),
            kind,
            value: None,
        }
    }

    /// Reassemble a reading from its stored parts (e.g. a disk buffer row).
    pub fn from_parts(timestamp: DateTime<Utc>, kind: String, value: Option<f64>) -> Reading {
        Reading {
            timestamp: truncate_to_micros(timestamp),
            kind,
            value,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Truncate to whole microseconds.  Out-of-range timestamps (which cannot
/// occur for wall-clock values) are passed through unchanged.
fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    match DateTime::from_timestamp_micros(ts.timestamp_micros()) {
        Some(t) => t,
        None => ts,
    }
}
