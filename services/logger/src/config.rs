//! Logger configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides.
//! Default config path: `/etc/wx-logger/logger.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `instance_prefix`
//! - `device.path`
//! - At least one `[readings]` translation entry
//! - `store.endpoint`, unless `store.dry_run = true`
//!
//! # Token file format
//! Raw token string on a single line; trimmed on read.  A whitespace-only
//! token file is rejected.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config or token file itself could not be read.
    #[error("cannot read '{path}': {source}")]
    Unreadable {
        path: String,
        source: std::io::Error,
    },
    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

// ---------------------------------------------------------------------------
// Config types (deserialized from TOML)
// ---------------------------------------------------------------------------

/// Top-level logger configuration.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub schema_version: u32,
    /// Tenant tag prepended to every reading kind.
    pub instance_prefix: String,
    pub device: DeviceConfig,
    pub intervals: IntervalsConfig,
    pub queue: QueueConfig,
    pub buffer: BufferConfig,
    pub store: StoreConfig,
    /// Sensor-line label → canonical store name.  Labels missing here are
    /// cached but never forwarded.
    pub readings: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct IntervalsConfig {
    /// Scraper and ping prober period, seconds.
    pub scrape_sec: u64,
    /// Stats writer period, seconds.
    pub stats_sec: u64,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Soft enqueue cap; producers check this before enqueueing.
    pub max_size: usize,
}

#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub sqlite_path: String,
    pub dump_hi_water: usize,
    pub dump_amount: usize,
    pub fetch_lo_water: usize,
    pub fetch_amount: usize,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Ingest endpoint URL.  `None` only in dry-run mode.
    pub endpoint: Option<String>,
    /// Bearer token (read from the token file, not the file path).
    pub token: Option<String>,
    pub batch_max: usize,
    /// Log and drop batches instead of calling the store.
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    instance_prefix: Option<String>,
    device: Option<RawDeviceConfig>,
    intervals: Option<RawIntervalsConfig>,
    queue: Option<RawQueueConfig>,
    buffer: Option<RawBufferConfig>,
    store: Option<RawStoreConfig>,
    auth: Option<RawAuthConfig>,
    readings: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawDeviceConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIntervalsConfig {
    scrape_sec: Option<u64>,
    stats_sec: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawQueueConfig {
    max_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawBufferConfig {
    sqlite_path: Option<String>,
    dump_hi_water: Option<usize>,
    dump_amount: Option<usize>,
    fetch_lo_water: Option<usize>,
    fetch_amount: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawStoreConfig {
    endpoint: Option<String>,
    batch_max: Option<usize>,
    dry_run: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawAuthConfig {
    token_file: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load logger config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<LoggerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_from_str(&toml_str)
}

/// Load logger config from the default path `/etc/wx-logger/logger.toml`.
pub fn load_config() -> Result<LoggerConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/wx-logger/logger.toml"))
}

/// Load logger config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<LoggerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    // Validate schema_version
    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {}",
            schema_version
        )));
    }

    // Instance prefix
    let instance_prefix = raw
        .instance_prefix
        .ok_or_else(|| ConfigError::MissingField("instance_prefix".to_owned()))?;
    if instance_prefix.is_empty() {
        return Err(ConfigError::InvalidValue(
            "instance_prefix must be non-empty".to_owned(),
        ));
    }

    // Device
    let raw_device = raw
        .device
        .ok_or_else(|| ConfigError::MissingField("device".to_owned()))?;
    let device = DeviceConfig {
        path: raw_device
            .path
            .ok_or_else(|| ConfigError::MissingField("device.path".to_owned()))?,
    };

    // Interval defaults
    let intervals = match raw.intervals {
        Some(i) => IntervalsConfig {
            scrape_sec: i.scrape_sec.unwrap_or(120),
            stats_sec: i.stats_sec.unwrap_or(600),
        },
        None => IntervalsConfig {
            scrape_sec: 120,
            stats_sec: 600,
        },
    };

    // Queue defaults
    let queue = QueueConfig {
        max_size: raw.queue.and_then(|q| q.max_size).unwrap_or(256 * 1024),
    };

    // Buffer defaults
    let buffer = match raw.buffer {
        Some(b) => BufferConfig {
            sqlite_path: b
                .sqlite_path
                .unwrap_or_else(|| "db_buffer.sqlite3".to_owned()),
            dump_hi_water: b.dump_hi_water.unwrap_or(150),
            dump_amount: b.dump_amount.unwrap_or(50),
            fetch_lo_water: b.fetch_lo_water.unwrap_or(10),
            fetch_amount: b.fetch_amount.unwrap_or(50),
        },
        None => BufferConfig {
            sqlite_path: "db_buffer.sqlite3".to_owned(),
            dump_hi_water: 150,
            dump_amount: 50,
            fetch_lo_water: 10,
            fetch_amount: 50,
        },
    };

    // Store (+ optional token file)
    let token = match raw.auth.and_then(|a| a.token_file) {
        Some(path) => Some(read_token_file(&path)?),
        None => None,
    };
    let store = match raw.store {
        Some(s) => StoreConfig {
            endpoint: s.endpoint,
            token,
            batch_max: s.batch_max.unwrap_or(10),
            dry_run: s.dry_run.unwrap_or(false),
        },
        None => StoreConfig {
            endpoint: None,
            token,
            batch_max: 10,
            dry_run: false,
        },
    };
    if store.endpoint.is_none() && !store.dry_run {
        return Err(ConfigError::MissingField("store.endpoint".to_owned()));
    }
    if store.batch_max == 0 {
        return Err(ConfigError::InvalidValue(
            "store.batch_max must be at least 1".to_owned(),
        ));
    }

    // Validate translation map
    let readings = raw
        .readings
        .ok_or_else(|| ConfigError::MissingField("readings".to_owned()))?;
    if readings.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one [readings] entry is required".to_owned(),
        ));
    }

    Ok(LoggerConfig {
        schema_version,
        instance_prefix,
        device,
        intervals,
        queue,
        buffer,
        store,
        readings,
    })
}

// ---------------------------------------------------------------------------
// Bearer token
// ---------------------------------------------------------------------------

/// Read and trim the bearer token.  A file that exists but holds only
/// whitespace is a provisioning mistake, not a usable credential.
fn read_token_file(path: &str) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
        path: path.to_owned(),
        source: e,
    })?;
    let token = content.trim();
    if token.is_empty() {
        return Err(ConfigError::InvalidValue(format!(
            "token file '{}' is empty",
            path
        )));
    }
    Ok(token.to_owned())
}
