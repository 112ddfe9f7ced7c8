//! The in-memory priority queue between producers and consumers.
//!
//! Readings are ordered by timestamp with a monotonic insertion sequence as
//! tie-break, so ties resolve stably.  The queue can hand out both extrema:
//! the uploader drains newest-first so fresh data becomes visible quickly,
//! while the disk buffer spills oldest-first so the cold tail sinks to disk.
//!
//! The queue itself is unbounded; producers consult [`ReadingQueue::len`]
//! against the configured cap before enqueueing.  The disk buffer is the
//! real safety net.
//!
//! # Counters
//! `total_new_enqueued` counts user-initiated enqueues only.  Put-backs
//! (a consumer returning a reading it failed to process) do not increment
//! it, so the counter reflects distinct readings offered to the pipeline.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use wx_core::Reading;

// ---------------------------------------------------------------------------
// ReadingQueue
// ---------------------------------------------------------------------------

/// Thread-safe timestamp-ordered queue of readings.
pub struct ReadingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

struct Inner {
    /// Key: (timestamp, insertion seq).  The seq keeps equal timestamps
    /// distinct and makes tie-breaking stable.
    items: BTreeMap<(DateTime<Utc>, u64), Reading>,
    next_seq: u64,
    total_new: u64,
}

impl ReadingQueue {
    pub fn new() -> ReadingQueue {
        ReadingQueue {
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_seq: 0,
                total_new: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a new reading and wake one waiting consumer.
    pub fn enqueue_new(&self, reading: Reading) {
        {
            let mut inner = self.locked();
            inner.total_new += 1;
            let key = (reading.timestamp(), inner.next_seq);
            inner.next_seq += 1;
            inner.items.insert(key, reading);
        }
        self.notify.notify_one();
    }

    /// Return a reading a consumer failed to process.  Does not count as a
    /// new enqueue.
    pub fn put_back(&self, reading: Reading) {
        {
            let mut inner = self.locked();
            let key = (reading.timestamp(), inner.next_seq);
            inner.next_seq += 1;
            inner.items.insert(key, reading);
        }
        self.notify.notify_one();
    }

    /// Remove and return the reading with the largest timestamp, waiting
    /// until the queue is non-empty.
    pub async fn pop_newest(&self) -> Reading {
        loop {
            let notified = self.notify.notified();
            if let Some(reading) = self.pop_newest_nowait() {
                return reading;
            }
            notified.await;
        }
    }

    /// Remove and return the reading with the smallest timestamp, waiting
    /// until the queue is non-empty.
    pub async fn pop_oldest(&self) -> Reading {
        loop {
            let notified = self.notify.notified();
            if let Some(reading) = self.pop_oldest_nowait() {
                return reading;
            }
            notified.await;
        }
    }

    /// Remove and return the newest reading, or `None` if the queue is empty.
    pub fn pop_newest_nowait(&self) -> Option<Reading> {
        let mut inner = self.locked();
        inner.items.pop_last().map(|(_, r)| r)
    }

    /// Remove and return the oldest reading, or `None` if the queue is empty.
    pub fn pop_oldest_nowait(&self) -> Option<Reading> {
        let mut inner = self.locked();
        inner.items.pop_first().map(|(_, r)| r)
    }

    /// Current number of queued readings.
    pub fn len(&self) -> usize {
        self.locked().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total readings ever inserted via [`ReadingQueue::enqueue_new`].
    pub fn total_new_enqueued(&self) -> u64 {
        self.locked().total_new
    }

    /// Critical sections never panic, so a poisoned lock only means another
    /// thread died elsewhere; recover the guard rather than cascading.
    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReadingQueue {
    fn default() -> Self {
        Self::new()
    }
}
