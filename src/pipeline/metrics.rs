//! Run metrics and per-completion progress reporting.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters for a chunking run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Deriver tasks handed to the worker pool
    pub tasks_submitted: AtomicU64,

    /// Tasks whose result was folded into the accumulator
    pub tasks_succeeded: AtomicU64,

    /// Tasks that failed for any reason
    pub tasks_failed: AtomicU64,

    /// Tasks abandoned by the timeout guard
    pub tasks_timed_out: AtomicU64,

    /// Individual open attempts
    pub open_attempts: AtomicU64,

    /// Open attempts that errored or timed out
    pub open_failures: AtomicU64,

    /// Files successfully opened
    pub files_opened: AtomicU64,

    /// Entries counted across all opened files
    pub entries_scanned: AtomicU64,

    /// Chunk descriptors produced
    pub chunks_emitted: AtomicU64,

    /// Files left in batches that were never flushed
    pub files_dropped: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent opening files (microseconds, summed across tasks)
    pub open_us: AtomicU64,

    /// Wall time of deriver tasks (microseconds, summed across tasks)
    pub derive_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_succeeded(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_task_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_open_attempt(&self) {
        self.open_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_open_failure(&self) {
        self.open_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file_opened(&self) {
        self.files_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_entries_scanned(&self, entries: u64) {
        self.entries_scanned.fetch_add(entries, Ordering::Relaxed);
    }

    pub fn add_chunks_emitted(&self, count: u64) {
        self.chunks_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_files_dropped(&self, count: u64) {
        self.files_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record time spent opening a file (in microseconds).
    pub fn add_open_time(&self, duration: Duration) {
        self.open_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record deriver task wall time (in microseconds).
    pub fn add_derive_time(&self, duration: Duration) {
        self.derive_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Files opened per second of wall time.
    pub fn files_per_second(&self) -> f64 {
        let files = self.files_opened.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            files as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
            open_attempts: self.open_attempts.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            files_opened: self.files_opened.load(Ordering::Relaxed),
            entries_scanned: self.entries_scanned.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            files_dropped: self.files_dropped.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            files_per_second: self.files_per_second(),
            open_secs: self.open_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            derive_secs: self.derive_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub open_attempts: u64,
    pub open_failures: u64,
    pub files_opened: u64,
    pub entries_scanned: u64,
    pub chunks_emitted: u64,
    pub files_dropped: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub files_per_second: f64,
    /// Time spent opening files (seconds, summed across tasks)
    pub open_secs: f64,
    /// Deriver task time (seconds, summed across tasks)
    pub derive_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        println!("\n=== Chunking Summary ===");
        println!("Total time: {:.1}s", self.elapsed.as_secs_f64());
        println!(
            "Tasks: {} submitted, {} succeeded, {} failed ({} timed out)",
            self.tasks_submitted, self.tasks_succeeded, self.tasks_failed, self.tasks_timed_out
        );
        println!(
            "Files: {} opened ({:.1}/s), {} dropped in unflushed batches",
            self.files_opened, self.files_per_second, self.files_dropped
        );
        println!(
            "Open attempts: {} ({} failed)",
            self.open_attempts, self.open_failures
        );
        println!("Entries scanned: {}", self.entries_scanned);
        println!("Chunks emitted: {}", self.chunks_emitted);
        if self.derive_secs > 0.0 {
            println!(
                "Time opening files: {:.1}s of {:.1}s task time ({:.1}%)",
                self.open_secs,
                self.derive_secs,
                self.open_secs / self.derive_secs * 100.0
            );
        }
        println!("========================\n");
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tasks: {} ok, {} failed | Files: {} opened, {} dropped | \
             Attempts: {} ({} failed) | Entries: {} | Chunks: {} | Elapsed: {:.1}s",
            self.tasks_succeeded,
            self.tasks_failed,
            self.files_opened,
            self.files_dropped,
            self.open_attempts,
            self.open_failures,
            self.entries_scanned,
            self.chunks_emitted,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Logs one line per completed task.
pub struct ProgressReporter {
    title: String,
    unit: String,
    total: usize,
    done: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(title: impl Into<String>, unit: impl Into<String>, total: usize) -> Self {
        Self {
            title: title.into(),
            unit: unit.into(),
            total,
            done: AtomicUsize::new(0),
        }
    }

    /// Record a completion and log progress.
    pub fn tick(&self) -> usize {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("{}", self.line(done));
        done
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    fn line(&self, done: usize) -> String {
        let pct = if self.total > 0 {
            done as f64 / self.total as f64 * 100.0
        } else {
            100.0
        };
        format!("{}: [{:.1}%] {}/{} {}", self.title, pct, done, self.total, self.unit)
    }
}
