//! Throughput telemetry: a line appended to `checkpoint.txt` every 100
//! blocks. Operational only; never read back, and append failures are
//! logged rather than propagated.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::warn;

const CHECKPOINT_INTERVAL: u64 = 100;

#[derive(Debug)]
pub struct CheckpointLog {
    path: PathBuf,
    started: Instant,
    blocks: u64,
    transactions: u64,
}

impl CheckpointLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started: Instant::now(),
            blocks: 0,
            transactions: 0,
        }
    }

    /// Accounts one committed block; flushes a summary line every
    /// [`CHECKPOINT_INTERVAL`] blocks. Rates derive from the monotonic
    /// clock, whatever its resolution.
    pub fn record(&mut self, batch_size: usize, execution_time: Duration) {
        self.blocks += 1;
        self.transactions += batch_size as u64;
        if self.blocks % CHECKPOINT_INTERVAL != 0 {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let tps = if elapsed > 0.0 {
            self.transactions as f64 / elapsed
        } else {
            0.0
        };
        let line = format!(
            "blocks={} last_batch={} last_exec_ms={} cumulative_tps={:.2}\n",
            self.blocks,
            batch_size,
            execution_time.as_millis(),
            tps
        );

        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = appended {
            warn!(path = %self.path.display(), error = %e, "checkpoint append failed");
        }
    }
}
