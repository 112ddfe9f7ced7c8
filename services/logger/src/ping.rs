//! Internet latency prober.
//!
//! Once per scrape interval, pings a fixed set of well-known anycast hosts
//! with a single echo each and a 1 second timeout, and enqueues the minimum
//! successful round-trip time (in seconds) as a `connection:internet_latency`
//! reading.  Probing several targets removes the uncertainty of any one host
//! being temporarily down; if none respond, nothing is enqueued this tick.

use crate::queue::ReadingQueue;
use chrono::Utc;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;
use wx_core::{Reading, connection_kind};

/// Anycast resolvers pinged each tick.
const PROBE_HOSTS: [&str; 4] = ["8.8.8.8", "8.8.4.4", "1.1.1.1", "1.0.0.1"];

/// Per-probe timeout, passed to `ping -W`.
const PROBE_TIMEOUT_SEC: &str = "1";

/// Hard cutoff on the whole subprocess, for ping builds that do not honor
/// `-W`.  Covers spawn plus the 1 s echo wait.
const PROBE_DEADLINE: Duration = Duration::from_secs(3);

fn reply_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9]+ bytes from .*: icmp_seq=[0-9]+ ttl=[0-9]+ time=([0-9.]+) ms$")
            .expect("reply pattern is valid")
    })
}

// ---------------------------------------------------------------------------
// PingProber
// ---------------------------------------------------------------------------

pub struct PingProber {
    queue: Arc<ReadingQueue>,
    instance_prefix: String,
    interval: Duration,
    max_queue_size: usize,
}

impl PingProber {
    pub fn new(
        queue: Arc<ReadingQueue>,
        instance_prefix: String,
        interval: Duration,
        max_queue_size: usize,
    ) -> PingProber {
        PingProber {
            queue,
            instance_prefix,
            interval,
            max_queue_size,
        }
    }

    /// Probe forever at the configured cadence.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.queue.len() >= self.max_queue_size {
                debug!(queue = self.queue.len(), "queue too long, dropping probe tick");
                continue;
            }
            let Some(latency) = measure_internet_latency().await else {
                // All targets unreachable; surfaces in the gap between
                // latency readings rather than as a zero.
                continue;
            };
            let kind = connection_kind(&self.instance_prefix, "internet_latency");
            self.queue.enqueue_new(Reading::new(Utc::now(), kind, latency));
        }
    }
}

/// Ping every probe host sequentially and return the minimum successful
/// round-trip time in seconds, or `None` if no host responded.
pub async fn measure_internet_latency() -> Option<f64> {
    let mut results = Vec::with_capacity(PROBE_HOSTS.len());
    for host in PROBE_HOSTS {
        results.push(probe_host(host).await);
    }
    min_latency(results)
}

/// Minimum of the successful probes.
fn min_latency(results: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    results
        .into_iter()
        .flatten()
        .reduce(f64::min)
}

/// One ICMP echo against `host`.  Any failure (spawn error, deadline,
/// non-zero exit, unparseable output) reads as an unreachable target.
async fn probe_host(host: &str) -> Option<f64> {
    let output = Command::new("ping")
        .args(["-n", "-c", "1", "-W", PROBE_TIMEOUT_SEC, host])
        .kill_on_drop(true)
        .output();
    let output = timeout(PROBE_DEADLINE, output).await.ok()?.ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ping_output(&stdout)
}

/// Extract the round-trip time (seconds) from ping's stdout.
fn parse_ping_output(output: &str) -> Option<f64> {
    for line in output.lines() {
        if let Some(caps) = reply_regex().captures(line) {
            let millis: f64 = caps.get(1)?.as_str().parse().ok()?;
            return Some(millis / 1000.0);
        }
    }
    None
}
