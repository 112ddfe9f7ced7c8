//! Last-value cache for parsed sensor samples.
//!
//! The serial reader writes into the cache; the scraper reads from it.  The
//! label set is open: any label the parser accepts gets a slot on first
//! sight and is only ever overwritten afterwards, never removed.  Labels the
//! translation map does not know about simply sit here unread.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The most recent value seen for one label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSample {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Thread-safe map from sensor-line label to its last sample.
pub struct ReadingsCache {
    inner: Mutex<HashMap<String, LiveSample>>,
}

impl ReadingsCache {
    pub fn new() -> ReadingsCache {
        ReadingsCache {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Store `value` under `label`, stamped with the current wall clock.
    pub fn set(&self, label: &str, value: f64) {
        let sample = LiveSample {
            value,
            timestamp: Utc::now(),
        };
        self.locked().insert(label.to_owned(), sample);
    }

    /// Atomic read of the last sample for `label`, or `None` if the label
    /// has never been parsed.
    pub fn snapshot(&self, label: &str) -> Option<LiveSample> {
        self.locked().get(label).copied()
    }

    /// Number of distinct labels seen so far.
    pub fn label_count(&self) -> usize {
        self.locked().len()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, LiveSample>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReadingsCache {
    fn default() -> Self {
        Self::new()
    }
}
