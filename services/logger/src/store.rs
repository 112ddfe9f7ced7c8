//! Remote append-only store client.
//!
//! The store is write-only from the logger's point of view: a batch of
//! readings is appended under their kind keys, duplicates and all.  The
//! [`RemoteStore`] trait is the seam the uploader drains into;
//! [`StoreFactory`] exists because the uploader discards a client after any
//! failure and resumes with a fresh one.
//!
//! # Wire format
//! A batch is a JSON array of `{ key, timestamp, value? }` objects posted to
//! the ingest endpoint.  `value` is omitted entirely for absent readings;
//! the store records just the timestamp for those.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use wx_core::Reading;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store rejected batch: HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An append-only remote key/value store.
pub trait RemoteStore: Send + Sync {
    /// Append every reading in `entries`.  Any error means the whole batch
    /// must be treated as not written.
    fn put_batch(
        &self,
        entries: &[Reading],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Builds store clients.  Creation itself may fail and is retried by the
/// uploader like any other store error.
pub trait StoreFactory: Send + Sync {
    type Store: RemoteStore;

    fn create(&self) -> Result<Self::Store, StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct WireEntry<'a> {
    key: &'a str,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl<'a> From<&'a Reading> for WireEntry<'a> {
    fn from(r: &'a Reading) -> Self {
        WireEntry {
            key: r.kind(),
            timestamp: r.timestamp(),
            value: r.value(),
        }
    }
}

/// Store client that POSTs JSON batches to a configured ingest endpoint.
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RemoteStore for HttpStore {
    async fn put_batch(&self, entries: &[Reading]) -> Result<(), StoreError> {
        let body: Vec<WireEntry<'_>> = entries.iter().map(WireEntry::from).collect();
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Status(status));
        }
        Ok(())
    }
}

/// Factory for [`HttpStore`] clients.
#[derive(Clone)]
pub struct HttpStoreFactory {
    endpoint: String,
    token: Option<String>,
}

impl HttpStoreFactory {
    pub fn new(endpoint: String, token: Option<String>) -> HttpStoreFactory {
        HttpStoreFactory { endpoint, token }
    }
}

impl StoreFactory for HttpStoreFactory {
    type Store = HttpStore;

    fn create(&self) -> Result<HttpStore, StoreError> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpStore {
            client,
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
        })
    }
}
