//! Shared test doubles for the uploader suites.

use logger::store::{RemoteStore, StoreError, StoreFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use wx_core::Reading;

/// Shared state behind a mock store: a fault switch, the recorded batches,
/// and a failure counter.
#[derive(Default)]
pub struct MockState {
    pub fail: AtomicBool,
    pub failures: AtomicUsize,
    batches: Mutex<Vec<Vec<Reading>>>,
}

impl MockState {
    pub fn new(fail: bool) -> Arc<MockState> {
        let state = MockState::default();
        state.fail.store(fail, Ordering::SeqCst);
        Arc::new(state)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// All successfully written batches, in submission order.
    pub fn batches(&self) -> Vec<Vec<Reading>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every successfully written reading, flattened.
    pub fn written(&self) -> Vec<Reading> {
        self.batches().into_iter().flatten().collect()
    }
}

/// Store double that either records the batch or fails wholesale.
pub struct MockStore {
    state: Arc<MockState>,
}

impl RemoteStore for MockStore {
    async fn put_batch(&self, entries: &[Reading]) -> Result<(), StoreError> {
        if self.state.fail.load(Ordering::SeqCst) {
            self.state.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected outage".to_owned()));
        }
        self.state
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entries.to_vec());
        Ok(())
    }
}

pub struct MockFactory {
    pub state: Arc<MockState>,
}

impl StoreFactory for MockFactory {
    type Store = MockStore;

    fn create(&self) -> Result<MockStore, StoreError> {
        Ok(MockStore {
            state: Arc::clone(&self.state),
        })
    }
}

/// Poll `cond` under the paused clock until it holds.  Panics after a
/// generous number of virtual-time steps.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    panic!("condition not reached in virtual time");
}
