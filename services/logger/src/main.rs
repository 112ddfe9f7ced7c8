// logger: Reads the sensor serial stream and forwards readings to the
// cloud store, spilling backlog to a local SQLite buffer during outages.

use logger::cache::ReadingsCache;
use logger::config;
use logger::console::Console;
use logger::ping::PingProber;
use logger::queue::ReadingQueue;
use logger::scraper::Scraper;
use logger::serial::SerialReader;
use logger::stats::{LoggerStats, StatsWriter};
use logger::storage::buffer::{BufferLoop, SpillPolicy};
use logger::store::HttpStoreFactory;
use logger::uploader::Uploader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "logger starting");

    // Load config from the path given as the first argument, or the default.
    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_config_from_path(std::path::Path::new(&path)),
        None => config::load_config(),
    };
    let cfg = match cfg {
        Ok(cfg) => {
            info!(
                device = %cfg.device.path,
                readings = cfg.readings.len(),
                dry_run = cfg.store.dry_run,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let queue = Arc::new(ReadingQueue::new());
    let cache = Arc::new(ReadingsCache::new());
    let stats = Arc::new(LoggerStats::new());

    let scrape_interval = Duration::from_secs(cfg.intervals.scrape_sec);
    let stats_interval = Duration::from_secs(cfg.intervals.stats_sec);

    // Serial reader: device stream → readings cache.
    let reader = SerialReader::new(
        PathBuf::from(&cfg.device.path),
        Arc::clone(&cache),
        Arc::clone(&stats),
    );
    tokio::spawn(reader.run());

    // Scraper: readings cache → queue.
    let translation: Vec<(String, String)> = cfg
        .readings
        .iter()
        .map(|(label, name)| (label.clone(), name.clone()))
        .collect();
    let scraper = Scraper::new(
        Arc::clone(&cache),
        Arc::clone(&queue),
        Arc::clone(&stats),
        translation,
        cfg.instance_prefix.clone(),
        scrape_interval,
        cfg.queue.max_size,
    );
    tokio::spawn(scraper.run());

    // Ping prober: connection quality → queue.
    let prober = PingProber::new(
        Arc::clone(&queue),
        cfg.instance_prefix.clone(),
        scrape_interval,
        cfg.queue.max_size,
    );
    tokio::spawn(prober.run());

    // Stats writer: upload health gauges → queue.
    let writer = StatsWriter::new(
        Arc::clone(&stats),
        Arc::clone(&queue),
        cfg.instance_prefix.clone(),
        stats_interval,
        cfg.queue.max_size,
    );
    tokio::spawn(writer.run());

    // Disk buffer: spill/restore policy loop on the blocking pool.
    let buffer_loop = BufferLoop::new(
        PathBuf::from(&cfg.buffer.sqlite_path),
        Arc::clone(&queue),
        SpillPolicy {
            dump_hi_water: cfg.buffer.dump_hi_water,
            dump_amount: cfg.buffer.dump_amount,
            fetch_lo_water: cfg.buffer.fetch_lo_water,
            fetch_amount: cfg.buffer.fetch_amount,
        },
    );
    tokio::task::spawn_blocking(move || buffer_loop.run());

    // Uploader: queue → cloud store.
    let factory = HttpStoreFactory::new(
        cfg.store.endpoint.clone().unwrap_or_default(),
        cfg.store.token.clone(),
    );
    let uploader = Uploader::new(
        Arc::clone(&queue),
        Arc::clone(&stats),
        factory,
        cfg.store.batch_max,
        cfg.store.dry_run,
    );
    tokio::spawn(uploader.run());

    // Give the subsystems a moment before the first prompt.
    tokio::time::sleep(Duration::from_secs(10)).await;

    // Operator console owns the foreground.
    let console = Console::new(Arc::clone(&queue), Arc::clone(&stats));
    let handle = tokio::task::spawn_blocking(move || console.run());
    let _ = handle.await;
}
