//! Cloud uploader: drains the queue newest-first into the remote store.
//!
//! Newest-first means the freshest data becomes visible to operators as soon
//! as connectivity returns after an outage; the stale tail drains afterwards
//! from the disk buffer.
//!
//! # Failure handling
//! There is exactly one recoverable condition: any error from the store (or
//! from client construction).  On failure the whole in-flight batch is
//! returned to the queue, the client is discarded, and the loop sleeps
//! before building a fresh client.  The uploader retries forever; there is
//! no fatal case.

use crate::queue::ReadingQueue;
use crate::stats::LoggerStats;
use crate::store::{RemoteStore, StoreError, StoreFactory};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wx_core::Reading;

/// Wait after a failed write or client construction.
const RETRY_DELAY: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// SubmitOutcome
// ---------------------------------------------------------------------------

/// Outcome of one batch submission.  Put-back is driven by matching
/// `Failure`, which keeps the invariant auditable in one place.
#[derive(Debug)]
pub enum SubmitOutcome {
    Success { latency: Duration, elements: usize },
    Failure(StoreError),
}

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

pub struct Uploader<F: StoreFactory> {
    queue: Arc<ReadingQueue>,
    stats: Arc<LoggerStats>,
    factory: F,
    batch_max: usize,
    dry_run: bool,
}

impl<F: StoreFactory> Uploader<F> {
    pub fn new(
        queue: Arc<ReadingQueue>,
        stats: Arc<LoggerStats>,
        factory: F,
        batch_max: usize,
        dry_run: bool,
    ) -> Uploader<F> {
        Uploader {
            queue,
            stats,
            factory,
            batch_max,
            dry_run,
        }
    }

    /// Upload forever.  Each pass builds a fresh client and drains the queue
    /// with it until the first failure.
    pub async fn run(self) {
        loop {
            match self.factory.create() {
                Ok(store) => self.drain(&store).await,
                Err(e) => {
                    warn!(error = %e, "problem creating cloud store client");
                    self.stats.record_upload_result(false, None, None);
                }
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    /// Drain batches until a submission fails.
    async fn drain(&self, store: &F::Store) {
        loop {
            let batch = self.collect_batch().await;
            match self.submit(store, &batch).await {
                SubmitOutcome::Success { latency, elements } => {
                    debug!(elements, latency_ms = latency.as_millis() as u64, "batch written");
                    self.stats
                        .record_upload_result(true, Some(latency.as_secs_f64()), Some(elements));
                }
                SubmitOutcome::Failure(e) => {
                    warn!(error = %e, elements = batch.len(), "problem writing to cloud store");
                    for reading in batch {
                        self.queue.put_back(reading);
                    }
                    self.stats.record_upload_result(false, None, None);
                    return;
                }
            }
        }
    }

    /// One blocking pop plus opportunistic pops up to the batch cap.
    async fn collect_batch(&self) -> Vec<Reading> {
        let mut batch = Vec::with_capacity(self.batch_max);
        batch.push(self.queue.pop_newest().await);
        while batch.len() < self.batch_max {
            match self.queue.pop_newest_nowait() {
                Some(reading) => batch.push(reading),
                None => break,
            }
        }
        batch
    }

    /// Submit one batch, measuring wall latency.  In dry-run mode the batch
    /// is logged and dropped but still reported as a success.
    async fn submit(&self, store: &F::Store, batch: &[Reading]) -> SubmitOutcome {
        let started = Instant::now();
        if self.dry_run {
            for reading in batch {
                info!(
                    kind = reading.kind(),
                    timestamp = %reading.timestamp(),
                    value = reading.value(),
                    "dry run: dropping reading"
                );
            }
            return SubmitOutcome::Success {
                latency: started.elapsed(),
                elements: batch.len(),
            };
        }
        match store.put_batch(batch).await {
            Ok(()) => SubmitOutcome::Success {
                latency: started.elapsed(),
                elements: batch.len(),
            },
            Err(e) => SubmitOutcome::Failure(e),
        }
    }
}
