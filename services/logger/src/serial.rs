//! Serial stream reader.
//!
//! Reads the line-oriented sensor stream from the configured device path and
//! feeds parsed samples into the readings cache.  The device is opened in
//! byte mode and decoded as UTF-8 with replacement, so a burst of line noise
//! cannot kill the loop.
//!
//! # Failure policy
//! End-of-stream is a stream error like any other: the handle is closed, the
//! reader sleeps 30 s, and the device is reopened.  The wait absorbs
//! disconnect/reconnect thrash on flaky cables.  The reader never terminates
//! the process.

use crate::cache::ReadingsCache;
use crate::stats::LoggerStats;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use wx_core::parse_sensor_line;

/// Wait between stream reopen attempts.
const REOPEN_DELAY: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SerialError {
    Io(std::io::Error),
    /// An empty read: the device went away.
    StreamTerminated,
}

impl std::fmt::Display for SerialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerialError::Io(e) => write!(f, "IO error: {}", e),
            SerialError::StreamTerminated => write!(f, "input stream was terminated"),
        }
    }
}

impl std::error::Error for SerialError {}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// SerialReader
// ---------------------------------------------------------------------------

/// Owns the device path and runs the read-parse-cache loop forever.
pub struct SerialReader {
    path: PathBuf,
    cache: Arc<ReadingsCache>,
    stats: Arc<LoggerStats>,
}

impl SerialReader {
    pub fn new(path: PathBuf, cache: Arc<ReadingsCache>, stats: Arc<LoggerStats>) -> SerialReader {
        SerialReader { path, cache, stats }
    }

    /// Open the device and consume it until it fails, forever.
    ///
    /// This function never returns.
    pub async fn run(self) {
        loop {
            if let Err(e) = self.open_and_read().await {
                warn!(path = %self.path.display(), error = %e, "problem reading sensor stream");
            }
            tokio::time::sleep(REOPEN_DELAY).await;
            info!("re-starting sensor stream reader");
        }
    }

    async fn open_and_read(&self) -> Result<(), SerialError> {
        info!(path = %self.path.display(), "opening sensor stream");
        let file = File::open(&self.path).await?;
        info!(path = %self.path.display(), "opened sensor stream");
        self.read_stream(BufReader::new(file)).await
    }

    /// Consume lines from `reader` until the stream errors or terminates.
    ///
    /// Exposed to tests, which drive it with an in-memory reader.
    pub async fn read_stream<R>(&self, mut reader: R) -> Result<(), SerialError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).await?;
            if n == 0 {
                return Err(SerialError::StreamTerminated);
            }

            let decoded = String::from_utf8_lossy(&buf);
            let line = decoded.trim();
            if line.is_empty() {
                continue;
            }

            self.stats.add_comm_lines(1);
            self.stats.add_comm_bytes(line.len() as u64);

            let Some((label, value)) = parse_sensor_line(line) else {
                // Damaged line.
                continue;
            };
            self.stats.add_comm_parsed_lines(1);
            self.cache.set(label, value);
        }
    }
}
