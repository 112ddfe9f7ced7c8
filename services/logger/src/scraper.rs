//! Periodic scraper: readings cache → priority queue.
//!
//! Every scrape interval, each label in the translation map is checked for a
//! fresh cache sample.  Fresh means two things at once: the sample must be
//! newer than the last one emitted for that label, and it must not be older
//! than one scrape interval.  A sample that fails either check is skipped.
//!
//! # Duplicate suppression
//! After emitting, the per-label marker is advanced to the *scrape time*,
//! not the sample's own timestamp.  A second sample that arrives later
//! within the same tick window therefore compares `<=` the marker and is
//! skipped on the following tick.  This matches the long-standing behavior
//! of the deployed logger; see DESIGN.md before changing it.

use crate::cache::ReadingsCache;
use crate::queue::ReadingQueue;
use crate::stats::LoggerStats;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use wx_core::{Reading, reading_kind};

/// Converts selected cache entries into readings at a fixed cadence.
pub struct Scraper {
    cache: Arc<ReadingsCache>,
    queue: Arc<ReadingQueue>,
    stats: Arc<LoggerStats>,
    /// `(comm label, canonical name)` pairs; only these labels are promoted.
    translation: Vec<(String, String)>,
    instance_prefix: String,
    interval: Duration,
    max_queue_size: usize,
}

impl Scraper {
    pub fn new(
        cache: Arc<ReadingsCache>,
        queue: Arc<ReadingQueue>,
        stats: Arc<LoggerStats>,
        translation: Vec<(String, String)>,
        instance_prefix: String,
        interval: Duration,
        max_queue_size: usize,
    ) -> Scraper {
        Scraper {
            cache,
            queue,
            stats,
            translation,
            instance_prefix,
            interval,
            max_queue_size,
        }
    }

    /// Scrape forever at the configured cadence.
    pub async fn run(self) {
        let mut last_emitted: HashMap<String, DateTime<Utc>> = HashMap::new();
        loop {
            tokio::time::sleep(self.interval).await;
            if self.queue.len() >= self.max_queue_size {
                // Pressure-driven drop: skip the whole tick.
                debug!(queue = self.queue.len(), "queue too long, dropping scrape tick");
                continue;
            }
            self.scrape_once(&mut last_emitted, Utc::now());
        }
    }

    /// One scrape pass over the translation map.
    pub fn scrape_once(
        &self,
        last_emitted: &mut HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let staleness_limit =
            TimeDelta::from_std(self.interval).unwrap_or_else(|_| TimeDelta::seconds(120));

        for (label, name) in &self.translation {
            let Some(sample) = self.cache.snapshot(label) else {
                // No data yet under that label.
                continue;
            };
            if let Some(last) = last_emitted.get(label) {
                if sample.timestamp <= *last {
                    // Unchanged since the last emit.
                    continue;
                }
            }
            if now - sample.timestamp >= staleness_limit {
                // The sensor stopped producing this label; don't re-log
                // an old value with a fresh face.
                continue;
            }

            let kind = reading_kind(&self.instance_prefix, name);
            self.queue
                .enqueue_new(Reading::new(sample.timestamp, kind, sample.value));
            self.stats.record_new_reading();
            last_emitted.insert(label.clone(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(120);

    struct Fixture {
        scraper: Scraper,
        cache: Arc<ReadingsCache>,
        queue: Arc<ReadingQueue>,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(ReadingsCache::new());
        let queue = Arc::new(ReadingQueue::new());
        let stats = Arc::new(LoggerStats::new());
        let scraper = Scraper::new(
            Arc::clone(&cache),
            Arc::clone(&queue),
            stats,
            vec![("Temperature".to_owned(), "temperature".to_owned())],
            "wczasowa:ground_level:".to_owned(),
            INTERVAL,
            1024,
        );
        Fixture {
            scraper,
            cache,
            queue,
        }
    }

    #[test]
    fn fresh_sample_is_emitted_with_translated_kind() {
        let f = fixture();
        f.cache.set("Temperature", 21.5);
        let mut last = HashMap::new();
        f.scraper.scrape_once(&mut last, Utc::now());

        assert_eq!(f.queue.len(), 1);
        let r = f.queue.pop_oldest_nowait().unwrap();
        assert_eq!(r.kind(), "wczasowa:ground_level:reading:temperature");
        assert_eq!(r.value(), Some(21.5));
    }

    #[test]
    fn unknown_labels_are_never_promoted() {
        let f = fixture();
        f.cache.set("Dew point", 12.0);
        let mut last = HashMap::new();
        f.scraper.scrape_once(&mut last, Utc::now());
        assert!(f.queue.is_empty());
    }

    #[test]
    fn second_tick_without_new_sample_emits_nothing() {
        let f = fixture();
        f.cache.set("Temperature", 21.5);
        let sample = f.cache.snapshot("Temperature").unwrap();
        let t0 = sample.timestamp;

        let mut last = HashMap::new();
        f.scraper
            .scrape_once(&mut last, t0 + TimeDelta::seconds(10));
        f.scraper
            .scrape_once(&mut last, t0 + TimeDelta::seconds(70));

        // Both ticks are within staleness, but only the first emits.
        assert_eq!(f.queue.len(), 1);
    }

    #[test]
    fn stale_sample_is_skipped() {
        let f = fixture();
        f.cache.set("Temperature", 21.5);
        let t0 = f.cache.snapshot("Temperature").unwrap().timestamp;

        let mut last = HashMap::new();
        f.scraper
            .scrape_once(&mut last, t0 + TimeDelta::seconds(120));
        assert!(f.queue.is_empty());
        // And the marker was not advanced by the skip.
        assert!(last.is_empty());
    }

    #[test]
    fn marker_advances_to_scrape_time_not_sample_time() {
        let f = fixture();
        f.cache.set("Temperature", 21.5);
        let t0 = f.cache.snapshot("Temperature").unwrap().timestamp;
        let tick = t0 + TimeDelta::seconds(10);

        let mut last = HashMap::new();
        f.scraper.scrape_once(&mut last, tick);
        assert_eq!(last.get("Temperature"), Some(&tick));
    }

    #[test]
    fn reading_carries_sample_timestamp() {
        let f = fixture();
        f.cache.set("Temperature", 21.5);
        let sample = f.cache.snapshot("Temperature").unwrap();

        let mut last = HashMap::new();
        f.scraper.scrape_once(&mut last, sample.timestamp + TimeDelta::seconds(1));
        let r = f.queue.pop_oldest_nowait().unwrap();
        assert_eq!(r.timestamp().timestamp_micros(), sample.timestamp.timestamp_micros());
    }
}
