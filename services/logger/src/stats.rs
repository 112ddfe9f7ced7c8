//! Self-observation: upload results, comm counters, and the stats writer.
//!
//! [`LoggerStats`] is the ingest surface the other subsystems report into.
//! [`StatsWriter`] periodically summarizes the accumulated upload results
//! into gauges and feeds them back into the same pipeline as
//! `connection:*` readings, so the logger's own health ends up next to the
//! weather data in the store.
//!
//! A gauge is only emitted once at least [`MIN_SAMPLES`] results have
//! accumulated in the window; below the threshold the window is left intact
//! and keeps accumulating into the next interval.

use crate::queue::ReadingQueue;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;
use wx_core::{Reading, connection_kind};

/// Minimum accumulated samples before a gauge is worth emitting.
pub const MIN_SAMPLES: usize = 5;

// ---------------------------------------------------------------------------
// LoggerStats
// ---------------------------------------------------------------------------

/// Thread-safe collector of logger statistics.
pub struct LoggerStats {
    started: DateTime<Utc>,
    inner: Mutex<Counters>,
}

#[derive(Default)]
struct Counters {
    upload_successes: Vec<bool>,
    upload_latencies: Vec<f64>,
    uploaded_elements: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    new_readings: u64,
    comm_lines: u64,
    comm_bytes: u64,
    comm_parsed_lines: u64,
}

/// Copy-out of the operator gauges.  Taking a snapshot has no side effects.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub running: TimeDelta,
    pub uploaded_elements: u64,
    pub new_readings: u64,
    pub since_last_success: Option<TimeDelta>,
    pub since_last_failure: Option<TimeDelta>,
    pub comm_lines: u64,
    pub comm_bytes: u64,
    pub comm_parsed_lines: u64,
}

impl LoggerStats {
    pub fn new() -> LoggerStats {
        LoggerStats {
            started: Utc::now(),
            inner: Mutex::new(Counters::default()),
        }
    }

    /// Record one cloud write attempt.  `latency_s` and `elements` accompany
    /// successes; failures carry neither.
    pub fn record_upload_result(
        &self,
        success: bool,
        latency_s: Option<f64>,
        elements: Option<usize>,
    ) {
        let now = Utc::now();
        let mut c = self.locked();
        c.upload_successes.push(success);
        if success {
            if let Some(latency) = latency_s {
                c.upload_latencies.push(latency);
            }
            if let Some(n) = elements {
                c.uploaded_elements += n as u64;
            }
            c.last_success = Some(now);
        } else {
            c.last_failure = Some(now);
        }
    }

    /// Record that the scraper emitted one new reading.
    pub fn record_new_reading(&self) {
        self.locked().new_readings += 1;
    }

    pub fn add_comm_lines(&self, n: u64) {
        self.locked().comm_lines += n;
    }

    pub fn add_comm_bytes(&self, n: u64) {
        self.locked().comm_bytes += n;
    }

    pub fn add_comm_parsed_lines(&self, n: u64) {
        self.locked().comm_parsed_lines += n;
    }

    /// Success rate over the current window, clearing it.  Returns `None`
    /// (and leaves the window untouched) below [`MIN_SAMPLES`].
    pub fn take_success_rate(&self) -> Option<f64> {
        let mut c = self.locked();
        if c.upload_successes.len() < MIN_SAMPLES {
            return None;
        }
        let total = c.upload_successes.len();
        let ok = c.upload_successes.iter().filter(|s| **s).count();
        c.upload_successes.clear();
        Some(ok as f64 / total as f64)
    }

    /// Mean upload latency (seconds) over the current window, clearing it.
    /// Returns `None` (window untouched) below [`MIN_SAMPLES`].
    pub fn take_avg_latency(&self) -> Option<f64> {
        let mut c = self.locked();
        if c.upload_latencies.len() < MIN_SAMPLES {
            return None;
        }
        let mean = c.upload_latencies.iter().sum::<f64>() / c.upload_latencies.len() as f64;
        c.upload_latencies.clear();
        Some(mean)
    }

    /// Gauges for the operator console.
    pub fn snapshot(&self) -> StatsSnapshot {
        let now = Utc::now();
        let c = self.locked();
        StatsSnapshot {
            running: now - self.started,
            uploaded_elements: c.uploaded_elements,
            new_readings: c.new_readings,
            since_last_success: c.last_success.map(|t| now - t),
            since_last_failure: c.last_failure.map(|t| now - t),
            comm_lines: c.comm_lines,
            comm_bytes: c.comm_bytes,
            comm_parsed_lines: c.comm_parsed_lines,
        }
    }

    fn locked(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LoggerStats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StatsWriter
// ---------------------------------------------------------------------------

/// Periodic task that turns accumulated upload results into
/// `connection:*` gauge readings on the queue.
pub struct StatsWriter {
    stats: Arc<LoggerStats>,
    queue: Arc<ReadingQueue>,
    instance_prefix: String,
    interval: Duration,
    max_queue_size: usize,
}

impl StatsWriter {
    pub fn new(
        stats: Arc<LoggerStats>,
        queue: Arc<ReadingQueue>,
        instance_prefix: String,
        interval: Duration,
        max_queue_size: usize,
    ) -> StatsWriter {
        StatsWriter {
            stats,
            queue,
            instance_prefix,
            interval,
            max_queue_size,
        }
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            self.write_once(Utc::now());
        }
    }

    /// One stats flush: emit each gauge that has enough samples.
    pub fn write_once(&self, now: DateTime<Utc>) {
        let gauges = [
            ("cloud_db_write_success_rate", self.stats.take_success_rate()),
            ("cloud_db_write_latency", self.stats.take_avg_latency()),
        ];
        for (name, value) in gauges {
            let Some(value) = value else { continue };
            if self.queue.len() >= self.max_queue_size {
                debug!(gauge = name, "queue full, dropping stats gauge");
                continue;
            }
            let kind = connection_kind(&self.instance_prefix, name);
            self.queue.enqueue_new(Reading::new(now, kind, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(stats: &Arc<LoggerStats>, queue: &Arc<ReadingQueue>) -> StatsWriter {
        StatsWriter::new(
            Arc::clone(stats),
            Arc::clone(queue),
            "test:".to_owned(),
            Duration::from_secs(600),
            1024,
        )
    }

    #[test]
    fn four_successes_produce_no_gauge() {
        let stats = Arc::new(LoggerStats::new());
        let queue = Arc::new(ReadingQueue::new());
        for _ in 0..4 {
            stats.record_upload_result(true, Some(0.1), Some(1));
        }
        writer(&stats, &queue).write_once(Utc::now());
        assert!(queue.is_empty());
    }

    #[test]
    fn fifth_success_produces_exactly_one_success_rate_gauge() {
        let stats = Arc::new(LoggerStats::new());
        let queue = Arc::new(ReadingQueue::new());
        for _ in 0..4 {
            stats.record_upload_result(true, Some(0.1), Some(1));
        }
        writer(&stats, &queue).write_once(Utc::now());
        assert!(queue.is_empty());

        stats.record_upload_result(true, Some(0.1), Some(1));
        writer(&stats, &queue).write_once(Utc::now());

        // Five successes with five latencies: both gauges fire.
        assert_eq!(queue.len(), 2);
        let first = queue.pop_oldest_nowait().unwrap();
        let second = queue.pop_oldest_nowait().unwrap();
        let rate = [&first, &second]
            .into_iter()
            .find(|r| r.kind() == "test:connection:cloud_db_write_success_rate")
            .expect("success rate gauge present");
        assert_eq!(rate.value(), Some(1.0));
    }

    #[test]
    fn mixed_results_compute_fractional_success_rate() {
        let stats = Arc::new(LoggerStats::new());
        let queue = Arc::new(ReadingQueue::new());
        for ok in [true, true, false, true, false] {
            let latency = ok.then_some(0.2);
            let elements = ok.then_some(3);
            stats.record_upload_result(ok, latency, elements);
        }
        writer(&stats, &queue).write_once(Utc::now());

        // Only three latencies accumulated, so just the success rate fires.
        assert_eq!(queue.len(), 1);
        let gauge = queue.pop_oldest_nowait().unwrap();
        assert_eq!(gauge.kind(), "test:connection:cloud_db_write_success_rate");
        assert_eq!(gauge.value(), Some(0.6));
    }

    #[test]
    fn under_threshold_window_keeps_accumulating() {
        let stats = Arc::new(LoggerStats::new());
        for _ in 0..3 {
            stats.record_upload_result(false, None, None);
        }
        assert!(stats.take_success_rate().is_none());
        for _ in 0..2 {
            stats.record_upload_result(true, Some(0.1), Some(1));
        }
        // Earlier samples were not discarded by the failed take.
        assert_eq!(stats.take_success_rate(), Some(0.4));
    }

    #[test]
    fn latency_gauge_is_mean_of_window() {
        let stats = Arc::new(LoggerStats::new());
        for latency in [0.1, 0.2, 0.3, 0.4, 0.5] {
            stats.record_upload_result(true, Some(latency), Some(1));
        }
        let mean = stats.take_avg_latency().unwrap();
        assert!((mean - 0.3).abs() < 1e-9);
        // Window cleared by the successful take.
        assert!(stats.take_avg_latency().is_none());
    }

    #[test]
    fn snapshot_reports_uploaded_elements_and_comm_counters() {
        let stats = LoggerStats::new();
        stats.record_upload_result(true, Some(0.05), Some(7));
        stats.record_new_reading();
        stats.add_comm_lines(4);
        stats.add_comm_bytes(64);
        stats.add_comm_parsed_lines(3);

        let snap = stats.snapshot();
        assert_eq!(snap.uploaded_elements, 7);
        assert_eq!(snap.new_readings, 1);
        assert_eq!(snap.comm_lines, 4);
        assert_eq!(snap.comm_bytes, 64);
        assert_eq!(snap.comm_parsed_lines, 3);
        assert!(snap.since_last_success.is_some());
        assert!(snap.since_last_failure.is_none());
    }
}
