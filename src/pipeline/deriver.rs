//! Chunk derivation for one dispatched list of files.
//!
//! A deriver task opens each file in order, resolves the requested tree,
//! reads its entry count, and feeds the count to a [`Partitioner`]. Any
//! failure fails the whole task; there is no partial result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ChunkingError, Result};
use crate::io::RetryingOpener;
use crate::pipeline::partition::{PartitionOutput, PartitionScheme, Partitioner};
use crate::pipeline::{guard, Metrics};
use crate::types::{DeriverResult, FileRef, TreeNameSpec};

/// Derives chunk descriptors from file entry counts.
pub struct ChunkDeriver {
    opener: Arc<RetryingOpener>,
    scheme: PartitionScheme,
    metrics: Arc<Metrics>,
}

impl ChunkDeriver {
    pub fn new(opener: Arc<RetryingOpener>, scheme: PartitionScheme, metrics: Arc<Metrics>) -> Self {
        Self {
            opener,
            scheme,
            metrics,
        }
    }

    pub fn scheme(&self) -> PartitionScheme {
        self.scheme
    }

    /// Scan `files` and return one [`DeriverResult`] per flushed batch.
    ///
    /// When `timeout` is set the whole scan, retries included, is abandoned
    /// once it runs longer than `timeout`.
    pub async fn derive_chunks(
        &self,
        files: &[FileRef],
        tree: &TreeNameSpec,
        chunk_size: u64,
        timeout: Option<Duration>,
    ) -> Result<Vec<DeriverResult>> {
        let start = Instant::now();
        let result = guard(timeout, self.scan(files, tree, chunk_size)).await;
        self.metrics.add_derive_time(start.elapsed());

        let output = result?;
        self.metrics.add_chunks_emitted(output.num_chunks() as u64);
        self.metrics.add_files_dropped(output.dropped_files.len() as u64);

        if !output.dropped_files.is_empty() {
            tracing::debug!(
                "{} of {} files ended in unflushed batches",
                output.dropped_files.len(),
                files.len()
            );
        }

        Ok(output.results)
    }

    async fn scan(&self, files: &[FileRef], tree: &TreeNameSpec, chunk_size: u64) -> Result<PartitionOutput> {
        // Rejects a zero chunk size before any file is opened.
        let mut partitioner = Partitioner::new(tree.clone(), chunk_size, self.scheme)?;

        for file in files {
            let handle = self.opener.open_with_retry(&file.path).await?;
            let name = tree.resolve(&file.path, |n| handle.has_tree(n))?;
            let entries = handle
                .tree(name)
                .map(|info| info.num_entries)
                .ok_or_else(|| ChunkingError::TreeResolution {
                    path: file.path.clone(),
                    spec: tree.clone(),
                })?;

            tracing::trace!("{} [{}]: tree {} has {} entries", file.path, file.dataset, name, entries);
            self.metrics.add_entries_scanned(entries);
            partitioner.push(file, entries);
        }

        Ok(partitioner.finish())
    }
}
