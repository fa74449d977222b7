//! Chunk planner
//!
//! Partitions large columnar data files into fixed-size entry chunks for
//! downstream parallel processing. Files are inspected through their Parquet
//! footers only; no entry data is read.
//!
//! # Architecture
//!
//! - **Types**: file references, tree name specs, and chunk descriptors
//! - **I/O**: local and S3 file resolution via object_store, footer decoding,
//!   and an opener with per-attempt timeouts and a fixed retry budget
//! - **Pipeline**: deriver tasks on a bounded worker pool, collected in
//!   completion order into a single chunk list
//!
//! # Usage
//!
//! ```no_run
//! use chunkplan::{run_chunking, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let report = run_chunking(&config)?;
//!     println!("{} chunks", report.chunks.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::ChunkingError;
pub use io::{FileOpener, ObjectStoreOpener, RetryingOpener, TreeFile};
pub use pipeline::{Chunker, ChunkingReport, Metrics, PartitionScheme, SchedulerStats, WorkerPool};
pub use types::{AccumulatedChunk, FileRef, TreeNameSpec};

use anyhow::Result;

/// Run one chunking pass over every file in `config`.
///
/// Blocks until all deriver tasks finish. The worker pool is shut down before
/// returning, on success or failure.
pub fn run_chunking(config: &Config) -> Result<ChunkingReport> {
    config.validate()?;

    let files = config.file_refs();
    tracing::info!(
        "Chunking {} files across {} datasets",
        files.len(),
        config.input.datasets.len()
    );

    let chunker = Chunker::load(config)?;
    let report = chunker.run(
        &files,
        &config.chunking.tree_name,
        config.chunking.chunk_size,
        config.chunking.show_progress,
        config.chunking.task_timeout(),
    )?;
    chunker.shutdown();

    Ok(report)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_parquet;

    #[test]
    fn test_run_chunking_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_parquet(dir.path(), "a.parquet", 70, Some("Events"));
        let b = write_parquet(dir.path(), "b.parquet", 260, Some("Events"));

        let yaml = format!(
            r#"
input:
  datasets:
    - name: ZJets
      files: ["{}", "{}"]
chunking:
  tree_name: Events
  chunk_size: 100
  show_progress: false
processing:
  concurrency: 2
  worker_threads: 2
"#,
            a, b
        );
        let config = Config::from_yaml(&yaml).unwrap();

        let report = run_chunking(&config).unwrap();

        // 70 + 260 > 100, last file 260 -> 3 chunks over both files.
        assert_eq!(report.chunks.len(), 3);
        assert!(report.chunks.iter().all(|c| c.files.len() == 2 && c.dataset == "ZJets"));
        assert!(report.stats.all_succeeded());
    }

    #[test]
    fn test_run_chunking_rejects_invalid_config() {
        let config = Config::from_yaml(
            r#"
input:
  datasets: []
chunking:
  tree_name: Events
  chunk_size: 0
"#,
        )
        .unwrap();

        assert!(run_chunking(&config).is_err());
    }
}
