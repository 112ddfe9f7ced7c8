//! Operator console.
//!
//! A blocking stdin prompt: each input line prints the pipeline gauges to
//! stdout.  This is the one place plain `println!` is intended output rather
//! than logging.

use crate::queue::ReadingQueue;
use crate::stats::{LoggerStats, StatsSnapshot};
use chrono::TimeDelta;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Wait before retrying when stdin is closed or unreadable.
const STDIN_RETRY_DELAY: Duration = Duration::from_secs(60);

pub struct Console {
    queue: Arc<ReadingQueue>,
    stats: Arc<LoggerStats>,
}

impl Console {
    pub fn new(queue: Arc<ReadingQueue>, stats: Arc<LoggerStats>) -> Console {
        Console { queue, stats }
    }

    /// Run the prompt loop forever.  Runs on the blocking pool.
    pub fn run(self) {
        let stdin = std::io::stdin();
        loop {
            print!("Press enter to show stats ");
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => {
                    // stdin closed (e.g. running under a supervisor).
                    std::thread::sleep(STDIN_RETRY_DELAY);
                }
                Ok(_) => {
                    println!();
                    self.print_gauges();
                    println!();
                }
                Err(e) => {
                    warn!(error = %e, "problem reading operator console input");
                    std::thread::sleep(STDIN_RETRY_DELAY);
                }
            }
        }
    }

    fn print_gauges(&self) {
        let snap = self.stats.snapshot();
        println!("Elements currently in queue: {}", self.queue.len());
        println!(
            "Total new elements put on the queue: {}",
            self.queue.total_new_enqueued()
        );
        println!("Total elements written to the cloud: {}", snap.uploaded_elements);
        println!("Total new readings scraped: {}", snap.new_readings);
        println!("Time running: {}", format_delta(snap.running));
        println!(
            "Time since last successful write: {}",
            format_opt_delta(snap.since_last_success)
        );
        println!(
            "Time since last failed write: {}",
            format_opt_delta(snap.since_last_failure)
        );
        println!("Comm lines read: {}", snap.comm_lines);
        println!("Comm bytes read: {}", snap.comm_bytes);
        println!("Comm lines parsed: {}", snap.comm_parsed_lines);
    }
}

fn format_delta(delta: TimeDelta) -> String {
    let secs = delta.num_seconds();
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn format_opt_delta(delta: Option<TimeDelta>) -> String {
    match delta {
        Some(d) => format_delta(d),
        None => "never".to_owned(),
    }
}
