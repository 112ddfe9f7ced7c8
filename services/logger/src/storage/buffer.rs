//! Durable SQLite spill buffer.
//!
//! Absorbs backlog when the in-memory queue grows past the high watermark
//! and restores it once the queue drains to the low watermark.  Spill takes
//! the *oldest* readings so the hot head of the queue stays in RAM for the
//! newest-first uploader; the cold tail sinks to disk.
//!
//! # Schema
//! One `readings` table `(id PK autoincrement, timestamp, kind, value)`,
//! created with IF NOT EXISTS so a restart with an existing file succeeds.
//!
//! # SQLite settings
//! Applied at open: WAL, synchronous=FULL.  `PRAGMA integrity_check` runs at
//! open; returns an error if it fails.
//!
//! # Timestamps
//! Stored as naive UTC text (`%Y-%m-%d %H:%M:%S%.6f`).  Inputs are UTC by
//! type (`DateTime<Utc>`); rows read back are re-stamped UTC, so a dump
//! followed by a fetch restores the same readings bit-exact.

use crate::queue::ReadingQueue;
use chrono::NaiveDateTime;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use wx_core::Reading;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Policy loop cadence.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Wait before reopening the database after an error.
const RECONNECT_DELAY: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("unparseable timestamp in buffer row: '{0}'")]
    BadTimestamp(String),
}

// ---------------------------------------------------------------------------
// DiskBuffer
// ---------------------------------------------------------------------------

/// The spill buffer over a single SQLite connection.
///
/// `rows_on_disk` mirrors the row count; it is refreshed by a COUNT once at
/// open and afterwards only adjusted inside the buffer's own transactions.
pub struct DiskBuffer {
    conn: Connection,
    rows_on_disk: u64,
    dump_amount: usize,
    fetch_amount: usize,
}

impl DiskBuffer {
    /// Open (or create) the buffer database at `path`.
    pub fn open(path: &Path, dump_amount: usize, fetch_amount: usize) -> Result<Self, BufferError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        let rows_on_disk: u64 =
            conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(DiskBuffer {
            conn,
            rows_on_disk,
            dump_amount,
            fetch_amount,
        })
    }

    /// Cached row count.
    pub fn rows_on_disk(&self) -> u64 {
        self.rows_on_disk
    }

    /// Move up to `dump_amount` oldest readings from the queue to disk in a
    /// single transaction.  On any error every taken reading is returned to
    /// the queue.  Returns the number of rows written.
    pub fn dump(&mut self, queue: &ReadingQueue) -> Result<usize, BufferError> {
        let mut taken = Vec::with_capacity(self.dump_amount);
        while taken.len() < self.dump_amount {
            match queue.pop_oldest_nowait() {
                Some(reading) => taken.push(reading),
                None => break,
            }
        }
        if taken.is_empty() {
            return Ok(0);
        }

        match self.insert_all(&taken) {
            Ok(()) => {
                self.rows_on_disk += taken.len() as u64;
                debug!(rows = taken.len(), on_disk = self.rows_on_disk, "spilled to disk");
                Ok(taken.len())
            }
            Err(e) => {
                for reading in taken {
                    queue.put_back(reading);
                }
                Err(e)
            }
        }
    }

    /// Move up to `fetch_amount` rows (oldest ids first) from disk back to
    /// the queue.  SELECT and DELETE share one transaction; the readings are
    /// put back only after commit.  Returns the number of rows restored.
    pub fn fetch(&mut self, queue: &ReadingQueue) -> Result<usize, BufferError> {
        let readings = self.take_rows()?;
        let n = readings.len();
        for reading in readings {
            queue.put_back(reading);
        }
        self.rows_on_disk -= n as u64;
        if n > 0 {
            debug!(rows = n, on_disk = self.rows_on_disk, "restored from disk");
        }
        Ok(n)
    }

    fn insert_all(&mut self, readings: &[Reading]) -> Result<(), BufferError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO readings (timestamp, kind, value) VALUES (?1, ?2, ?3)")?;
            for reading in readings {
                let timestamp = reading
                    .timestamp()
                    .naive_utc()
                    .format(TIMESTAMP_FORMAT)
                    .to_string();
                stmt.execute(params![timestamp, reading.kind(), reading.value()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// SELECT and DELETE up to `fetch_amount` rows in one transaction.
    fn take_rows(&mut self) -> Result<Vec<Reading>, BufferError> {
        let tx = self.conn.transaction()?;
        let rows: Vec<(i64, String, String, Option<f64>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, timestamp, kind, value FROM readings ORDER BY id ASC LIMIT ?1",
            )?;
            let mapped = stmt.query_map(params![self.fetch_amount as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            let mut rows = Vec::new();
            for row in mapped {
                rows.push(row?);
            }
            rows
        };

        let mut readings = Vec::with_capacity(rows.len());
        for (id, timestamp, kind, value) in rows {
            let naive = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
                .map_err(|_| BufferError::BadTimestamp(timestamp.clone()))?;
            readings.push(Reading::from_parts(naive.and_utc(), kind, value));
            tx.execute("DELETE FROM readings WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(readings)
    }
}

fn apply_pragmas(conn: &Connection) -> Result<(), BufferError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), BufferError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(BufferError::IntegrityCheckFailed(result));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Policy loop
// ---------------------------------------------------------------------------

/// Watermark thresholds for the policy loop.
#[derive(Debug, Clone)]
pub struct SpillPolicy {
    pub dump_hi_water: usize,
    pub dump_amount: usize,
    pub fetch_lo_water: usize,
    pub fetch_amount: usize,
}

/// Runs the spill/restore policy against one buffer database.
///
/// Synchronous by design: SQLite connections stay on one thread, so the loop
/// is spawned on the blocking pool and sleeps with the plain thread sleep.
pub struct BufferLoop {
    path: PathBuf,
    queue: Arc<ReadingQueue>,
    policy: SpillPolicy,
}

impl BufferLoop {
    pub fn new(path: PathBuf, queue: Arc<ReadingQueue>, policy: SpillPolicy) -> BufferLoop {
        BufferLoop {
            path,
            queue,
            policy,
        }
    }

    /// Run forever, reopening the database after any error.
    pub fn run(self) {
        loop {
            if let Err(e) = self.run_with_buffer() {
                warn!(error = %e, "problem with the disk buffer");
            }
            std::thread::sleep(RECONNECT_DELAY);
            info!("re-opening disk buffer");
        }
    }

    fn run_with_buffer(&self) -> Result<(), BufferError> {
        let mut buffer = DiskBuffer::open(&self.path, self.policy.dump_amount, self.policy.fetch_amount)?;
        info!(path = %self.path.display(), rows = buffer.rows_on_disk(), "disk buffer opened");
        loop {
            run_policy_once(&mut buffer, &self.queue, &self.policy)?;
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// One policy tick: spill above the high watermark, restore below the low
/// watermark.  The queue length is sampled once per tick.
pub fn run_policy_once(
    buffer: &mut DiskBuffer,
    queue: &ReadingQueue,
    policy: &SpillPolicy,
) -> Result<(), BufferError> {
    let queue_len = queue.len();
    if queue_len >= policy.dump_hi_water {
        buffer.dump(queue)?;
    }
    if queue_len <= policy.fetch_lo_water && buffer.rows_on_disk() > 0 {
        buffer.fetch(queue)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use tempfile::NamedTempFile;

    fn reading_at(micros: i64, kind: &str, value: Option<f64>) -> Reading {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_000_000 + micros).unwrap();
        Reading::from_parts(ts, kind.to_owned(), value)
    }

    fn open_buffer(file: &NamedTempFile) -> DiskBuffer {
        DiskBuffer::open(file.path(), 50, 50).expect("open buffer")
    }

    #[test]
    fn dump_then_fetch_restores_the_same_multiset() {
        let file = NamedTempFile::new().unwrap();
        let mut buffer = open_buffer(&file);
        let queue = ReadingQueue::new();

        let originals = vec![
            reading_at(1, "a:reading:temperature", Some(21.5)),
            reading_at(2_500_000, "a:reading:humidity", Some(44.0)),
            reading_at(999_999, "a:connection:internet_latency", Some(0.02)),
            reading_at(3, "a:connection:cloud_db_write_latency", None),
        ];
        for r in &originals {
            queue.enqueue_new(r.clone());
        }

        assert_eq!(buffer.dump(&queue).unwrap(), 4);
        assert_eq!(buffer.rows_on_disk(), 4);
        assert!(queue.is_empty());

        assert_eq!(buffer.fetch(&queue).unwrap(), 4);
        assert_eq!(buffer.rows_on_disk(), 0);

        let mut restored = Vec::new();
        while let Some(r) = queue.pop_oldest_nowait() {
            restored.push(r);
        }
        let key = |r: &Reading| (r.timestamp(), r.kind().to_owned());
        let mut want: Vec<_> = originals.iter().map(key).collect();
        let mut got: Vec<_> = restored.iter().map(key).collect();
        want.sort();
        got.sort();
        assert_eq!(want, got);
        for r in &restored {
            let original = originals
                .iter()
                .find(|o| o.timestamp() == r.timestamp())
                .unwrap();
            assert_eq!(original.value(), r.value());
        }
    }

    #[test]
    fn dump_takes_the_oldest_readings_first() {
        let file = NamedTempFile::new().unwrap();
        let mut buffer = DiskBuffer::open(file.path(), 2, 50).unwrap();
        let queue = ReadingQueue::new();

        for i in 0..4 {
            queue.enqueue_new(reading_at(i * 1_000_000, "k", Some(f64::from(i as i32))));
        }
        assert_eq!(buffer.dump(&queue).unwrap(), 2);

        // The two newest stay in RAM.
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_oldest_nowait().unwrap().value(), Some(2.0));
        assert_eq!(queue.pop_newest_nowait().unwrap().value(), Some(3.0));
    }

    #[test]
    fn fetch_restores_in_id_order_up_to_the_batch_size() {
        let file = NamedTempFile::new().unwrap();
        let mut buffer = DiskBuffer::open(file.path(), 50, 3).unwrap();
        let queue = ReadingQueue::new();

        for i in 0..5 {
            queue.enqueue_new(reading_at(i * 1_000_000, "k", Some(f64::from(i as i32))));
        }
        buffer.dump(&queue).unwrap();
        assert_eq!(buffer.rows_on_disk(), 5);

        assert_eq!(buffer.fetch(&queue).unwrap(), 3);
        assert_eq!(buffer.rows_on_disk(), 2);
        assert_eq!(queue.len(), 3);
        // Oldest ids come back first.
        assert_eq!(queue.pop_oldest_nowait().unwrap().value(), Some(0.0));
    }

    #[test]
    fn dump_on_empty_queue_is_a_no_op() {
        let file = NamedTempFile::new().unwrap();
        let mut buffer = open_buffer(&file);
        let queue = ReadingQueue::new();
        assert_eq!(buffer.dump(&queue).unwrap(), 0);
        assert_eq!(buffer.rows_on_disk(), 0);
    }

    #[test]
    fn reopen_preserves_rows_and_counts_them() {
        let file = NamedTempFile::new().unwrap();
        let queue = ReadingQueue::new();
        {
            let mut buffer = open_buffer(&file);
            for i in 0..7 {
                queue.enqueue_new(reading_at(i, "k", Some(1.0)));
            }
            buffer.dump(&queue).unwrap();
            assert_eq!(buffer.rows_on_disk(), 7);
        }

        // Restart with the existing file.
        let mut buffer = open_buffer(&file);
        assert_eq!(buffer.rows_on_disk(), 7);
        assert_eq!(buffer.fetch(&queue).unwrap(), 7);
        assert_eq!(queue.len(), 7);
    }

    #[test]
    fn policy_dumps_above_hi_water_and_fetches_below_lo_water() {
        let file = NamedTempFile::new().unwrap();
        let mut buffer = open_buffer(&file);
        let queue = ReadingQueue::new();
        let policy = SpillPolicy {
            dump_hi_water: 150,
            dump_amount: 50,
            fetch_lo_water: 10,
            fetch_amount: 50,
        };

        for i in 0..200 {
            queue.enqueue_new(reading_at(i * 1_000_000, "k", Some(1.0)));
        }
        run_policy_once(&mut buffer, &queue, &policy).unwrap();
        assert_eq!(queue.len(), 150);
        assert_eq!(buffer.rows_on_disk(), 50);

        // Mid-band: neither watermark triggers.
        run_policy_once(&mut buffer, &queue, &policy).unwrap();
        assert_eq!(queue.len(), 150);
        assert_eq!(buffer.rows_on_disk(), 50);

        // Drain the queue, then the policy restores from disk.
        while queue.pop_newest_nowait().is_some() {}
        run_policy_once(&mut buffer, &queue, &policy).unwrap();
        assert_eq!(queue.len(), 50);
        assert_eq!(buffer.rows_on_disk(), 0);
    }
}
