//! Chunking entry point: dispatches deriver tasks and flattens their results.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ChunkingError, Result};
use crate::io::{FileOpener, ObjectStoreOpener, RetryPolicy, RetryingOpener};
use crate::pipeline::{
    run_and_accumulate, ChunkDeriver, Metrics, MetricsSnapshot, ProgressConfig, SchedulerStats,
    TaskHandle, TaskSubmitter, WorkerPool,
};
use crate::types::{AccumulatedChunk, DeriverResult, FileRef, TreeNameSpec};

/// Output of a chunking run.
#[derive(Debug, Serialize)]
pub struct ChunkingReport {
    /// Flattened chunks, in task completion order
    pub chunks: Vec<AccumulatedChunk>,

    #[serde(skip)]
    pub stats: SchedulerStats,

    /// Counters accumulated by this chunker so far
    pub metrics: MetricsSnapshot,
}

/// Owns the worker pool and the shared opener for a series of chunking calls.
///
/// Dropping the chunker shuts the pool down; [`Chunker::shutdown`] does the
/// same but waits for in-flight tasks.
pub struct Chunker {
    pool: WorkerPool,
    deriver: Arc<ChunkDeriver>,
    metrics: Arc<Metrics>,
    max_files_per_task: Option<usize>,
    progress: ProgressConfig,
}

impl Chunker {
    pub fn new(pool: WorkerPool, opener: Arc<dyn FileOpener>, config: &Config) -> Self {
        let metrics = Metrics::new();
        let policy = RetryPolicy::from(&config.opener);
        let opener = Arc::new(RetryingOpener::new(opener, policy, metrics.clone()));
        let deriver = Arc::new(ChunkDeriver::new(opener, config.chunking.scheme, metrics.clone()));

        Self {
            pool,
            deriver,
            metrics,
            max_files_per_task: config.chunking.max_files_per_task,
            progress: ProgressConfig::default(),
        }
    }

    /// Start a worker pool and an object store opener from `config`.
    pub fn load(config: &Config) -> anyhow::Result<Self> {
        let pool = WorkerPool::load(&config.processing)?;
        let opener = Arc::new(ObjectStoreOpener::new(config.store.clone()));
        Ok(Self::new(pool, opener, config))
    }

    /// Replace the progress line labels.
    pub fn with_progress(mut self, progress: ProgressConfig) -> Self {
        self.progress = progress;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Partition `files` into chunks, blocking until every task has finished.
    ///
    /// Failed tasks are logged and skipped; their files are absent from the
    /// result. Only invalid arguments make this return an error.
    pub fn get_chunking(
        &self,
        files: &[FileRef],
        tree: &TreeNameSpec,
        chunk_size: u64,
        show_progress: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<AccumulatedChunk>> {
        Ok(self.run(files, tree, chunk_size, show_progress, timeout)?.chunks)
    }

    /// Like [`Chunker::get_chunking`], also returning task statistics and metrics.
    pub fn run(
        &self,
        files: &[FileRef],
        tree: &TreeNameSpec,
        chunk_size: u64,
        show_progress: bool,
        timeout: Option<Duration>,
    ) -> Result<ChunkingReport> {
        self.pool
            .block_on(self.get_chunking_async(files, tree, chunk_size, show_progress, timeout))
    }

    /// Async form of [`Chunker::run`] for callers already on a runtime.
    pub async fn get_chunking_async(
        &self,
        files: &[FileRef],
        tree: &TreeNameSpec,
        chunk_size: u64,
        show_progress: bool,
        timeout: Option<Duration>,
    ) -> Result<ChunkingReport> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidSpec("chunk size must be positive".to_string()));
        }
        tree.validate()?;

        let tasks = split_tasks(files, self.max_files_per_task);
        tracing::info!(
            "Dispatching {} files as {} deriver tasks (tree {}, chunk size {}, {:?} scheme)",
            files.len(),
            tasks.len(),
            tree,
            chunk_size,
            self.deriver.scheme()
        );

        let handles: Vec<TaskHandle<Vec<DeriverResult>>> = tasks
            .into_iter()
            .map(|task_files| {
                let deriver = self.deriver.clone();
                let task_files = task_files.to_vec();
                let tree = tree.clone();
                self.metrics.add_task_submitted();
                self.pool.submit(async move {
                    deriver.derive_chunks(&task_files, &tree, chunk_size, timeout).await
                })
            })
            .collect();

        let progress = show_progress.then_some(&self.progress);
        let (chunks, stats) = run_and_accumulate(handles, Vec::new(), combine, progress, &self.metrics).await;

        if stats.all_succeeded() {
            tracing::info!("Chunking complete: {} chunks ({})", chunks.len(), stats);
        } else {
            tracing::warn!(
                "Chunking complete with failures: {} chunks ({}); files of failed tasks are missing",
                chunks.len(),
                stats
            );
        }

        Ok(ChunkingReport {
            chunks,
            stats,
            metrics: self.metrics.snapshot(),
        })
    }

    /// Stop the worker pool, waiting for in-flight tasks up to the configured timeout.
    pub fn shutdown(self) {
        self.pool.cleanup();
    }
}

/// Fold one deriver task's results into the chunk list.
fn combine(acc: &mut Vec<AccumulatedChunk>, results: Vec<DeriverResult>) {
    for result in results {
        result.flatten_into(acc);
    }
}

/// Split `files` into one task per run of consecutive files sharing a dataset,
/// further capped at `max_files` files per task when set.
pub fn split_tasks(files: &[FileRef], max_files: Option<usize>) -> Vec<&[FileRef]> {
    let mut tasks = Vec::new();
    let mut start = 0;

    while start < files.len() {
        let dataset = &files[start].dataset;
        let run_len = files[start..]
            .iter()
            .take_while(|f| &f.dataset == dataset)
            .count();
        let run = &files[start..start + run_len];

        match max_files {
            Some(max) if max > 0 => tasks.extend(run.chunks(max)),
            _ => tasks.push(run),
        }
        start += run_len;
    }

    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingConfig;
    use crate::testing::{Behavior, ScriptedOpener};

    fn config(max_files_per_task: Option<usize>) -> Config {
        let mut config = Config::from_yaml(
            r#"
input:
  datasets: []
chunking:
  tree_name: Events
  chunk_size: 100
opener:
  attempt_timeout_ms: 50
  max_attempts: 2
"#,
        )
        .unwrap();
        config.chunking.max_files_per_task = max_files_per_task;
        config
    }

    fn chunker(scripted: Arc<ScriptedOpener>, config: &Config) -> Chunker {
        let pool = WorkerPool::load(&ProcessingConfig {
            concurrency: 4,
            worker_threads: Some(2),
            ..ProcessingConfig::default()
        })
        .unwrap();
        Chunker::new(pool, scripted, config)
    }

    fn refs(items: &[(&str, &str)]) -> Vec<FileRef> {
        items.iter().map(|(ds, p)| FileRef::new(*ds, *p)).collect()
    }

    #[test]
    fn test_split_by_dataset_runs() {
        let files = refs(&[("a", "1"), ("a", "2"), ("b", "3"), ("a", "4")]);
        let tasks = split_tasks(&files, None);

        let lens: Vec<usize> = tasks.iter().map(|t| t.len()).collect();
        assert_eq!(lens, vec![2, 1, 1]);
        assert_eq!(tasks[2][0].path, "4");
    }

    #[test]
    fn test_split_caps_files_per_task() {
        let files = refs(&[("a", "1"), ("a", "2"), ("a", "3"), ("b", "4")]);
        let tasks = split_tasks(&files, Some(2));

        let lens: Vec<usize> = tasks.iter().map(|t| t.len()).collect();
        assert_eq!(lens, vec![2, 1, 1]);
    }

    #[test]
    fn test_split_empty_input() {
        assert!(split_tasks(&[], Some(3)).is_empty());
    }

    #[test]
    fn test_invalid_arguments_fail_fast() {
        let scripted = Arc::new(ScriptedOpener::new());
        let chunker = chunker(scripted.clone(), &config(None));
        let files = refs(&[("a", "1")]);

        let err = chunker
            .get_chunking(&files, &TreeNameSpec::from("Events"), 0, false, None)
            .unwrap_err();
        assert!(matches!(err, ChunkingError::InvalidSpec(_)));

        let err = chunker
            .get_chunking(&files, &TreeNameSpec::Candidates(vec![]), 100, false, None)
            .unwrap_err();
        assert!(matches!(err, ChunkingError::InvalidSpec(_)));

        assert_eq!(scripted.attempts("1"), 0);
    }

    #[test]
    fn test_failed_dataset_is_skipped() {
        let scripted = Arc::new(ScriptedOpener::new());
        scripted.script("a1", Behavior::Trees(vec![("Events", 150)]));
        scripted.script("b1", Behavior::AlwaysFail);
        scripted.script("c1", Behavior::Trees(vec![("Events", 250)]));
        let chunker = chunker(scripted, &config(None));

        let files = refs(&[("A", "a1"), ("B", "b1"), ("C", "c1")]);
        let report = chunker
            .run(&files, &TreeNameSpec::from("Events"), 100, true, None)
            .unwrap();

        assert_eq!(report.stats.total_tasks, 3);
        assert_eq!(report.stats.tasks_failed, 1);
        assert_eq!(report.stats.failures[0].task_id, 1);

        let mut datasets: Vec<&str> = report.chunks.iter().map(|c| c.dataset.as_str()).collect();
        datasets.sort();
        datasets.dedup();
        assert_eq!(datasets, vec!["A", "C"]);
        // 150 -> indices 0..=1, 250 -> indices 0..=2
        assert_eq!(report.chunks.len(), 5);
        assert_eq!(report.metrics.tasks_failed, 1);
    }

    #[test]
    fn test_split_tasks_start_fresh_batches() {
        let scripted = Arc::new(ScriptedOpener::new());
        for path in ["1", "2", "3", "4"] {
            scripted.script(path, Behavior::Trees(vec![("Events", 60)]));
        }
        let files = refs(&[("a", "1"), ("a", "2"), ("a", "3"), ("a", "4")]);

        let whole = chunker(scripted.clone(), &config(None));
        let chunks = whole
            .get_chunking(&files, &TreeNameSpec::from("Events"), 100, false, None)
            .unwrap();
        assert_eq!(chunks.len(), 2);

        // Single-file tasks never exceed the chunk size, so every batch is dropped.
        let split = chunker(scripted, &config(Some(1)));
        let chunks = split
            .get_chunking(&files, &TreeNameSpec::from("Events"), 100, false, None)
            .unwrap();
        assert!(chunks.is_empty());
        assert_eq!(split.metrics().snapshot().files_dropped, 4);
    }

    #[test]
    fn test_task_timeout_fails_only_slow_task() {
        let scripted = Arc::new(ScriptedOpener::new());
        scripted.script("fast", Behavior::Trees(vec![("Events", 500)]));
        scripted.script("slow", Behavior::Delayed(Duration::from_millis(40), vec![("Events", 500)]));
        let chunker = chunker(scripted, &config(None));

        let files = refs(&[("fast", "fast"), ("slow", "slow")]);
        let report = chunker
            .run(
                &files,
                &TreeNameSpec::from("Events"),
                100,
                false,
                Some(Duration::from_millis(25)),
            )
            .unwrap();

        assert_eq!(report.stats.tasks_failed, 1);
        assert!(report.stats.failures[0].timed_out);
        assert!(report.chunks.iter().all(|c| c.dataset == "fast"));
        assert_eq!(report.metrics.tasks_timed_out, 1);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let chunker = chunker(Arc::new(ScriptedOpener::new()), &config(None)).with_progress(ProgressConfig {
            title: "Scanning".to_string(),
            unit: "datasets".to_string(),
        });
        let report = chunker
            .run(&[], &TreeNameSpec::from("Events"), 100, true, None)
            .unwrap();

        assert!(report.chunks.is_empty());
        assert_eq!(report.stats.total_tasks, 0);
        chunker.shutdown();
    }
}
