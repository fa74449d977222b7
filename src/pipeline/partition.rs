//! Grouping of scanned files into chunked batches.
//!
//! Files are appended to a running batch until its entry total crosses the
//! chunk size, at which point the batch is flushed into chunk descriptors.
//! A batch never spans two datasets.
//!
//! Two flush schemes exist:
//!
//! - [`PartitionScheme::Compatible`] flushes when the total strictly exceeds
//!   the chunk size, emits `last_file_entries / chunk_size + 1` chunks, and
//!   drops whatever batch is left pending when the dataset ends.
//! - [`PartitionScheme::Balanced`] flushes when the total reaches the chunk
//!   size, emits `ceil(total_entries / chunk_size)` chunks, and flushes the
//!   pending batch when the dataset ends.

use serde::{Deserialize, Serialize};

use crate::error::{ChunkingError, Result};
use crate::types::{ChunkDescriptor, DeriverResult, FileRef, TreeNameSpec};

/// How batches are flushed into chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionScheme {
    #[default]
    Compatible,
    Balanced,
}

/// Files accumulated since the last flush.
#[derive(Debug, Default)]
pub struct PartitionBatch {
    files: Vec<String>,
    total_entries: u64,
    last_entries: u64,
}

impl PartitionBatch {
    pub fn push(&mut self, path: &str, entries: u64) {
        self.files.push(path.to_string());
        self.total_entries += entries;
        self.last_entries = entries;
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn total_entries(&self) -> u64 {
        self.total_entries
    }

    fn take(&mut self) -> PartitionBatch {
        std::mem::take(self)
    }
}

/// Outcome of partitioning one deriver task's files.
#[derive(Debug, Default)]
pub struct PartitionOutput {
    pub results: Vec<DeriverResult>,

    /// Files left in a batch that was never flushed
    pub dropped_files: Vec<String>,
}

impl PartitionOutput {
    pub fn num_chunks(&self) -> usize {
        self.results.iter().map(|r| r.chunks.len()).sum()
    }
}

/// Incremental partitioner over a scan of files.
pub struct Partitioner {
    tree: TreeNameSpec,
    chunk_size: u64,
    scheme: PartitionScheme,
    dataset: Option<String>,
    batch: PartitionBatch,
    output: PartitionOutput,
}

impl Partitioner {
    /// Fails with [`ChunkingError::InvalidSpec`] when `chunk_size` is zero.
    pub fn new(tree: TreeNameSpec, chunk_size: u64, scheme: PartitionScheme) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidSpec("chunk size must be positive".to_string()));
        }
        Ok(Self {
            tree,
            chunk_size,
            scheme,
            dataset: None,
            batch: PartitionBatch::default(),
            output: PartitionOutput::default(),
        })
    }

    /// Add the next scanned file and its entry count.
    pub fn push(&mut self, file: &FileRef, entries: u64) {
        if self.dataset.as_deref() != Some(file.dataset.as_str()) {
            self.end_dataset();
            self.dataset = Some(file.dataset.clone());
        }

        self.batch.push(&file.path, entries);

        let should_flush = match self.scheme {
            PartitionScheme::Compatible => self.batch.total_entries > self.chunk_size,
            PartitionScheme::Balanced => self.batch.total_entries >= self.chunk_size,
        };
        if should_flush {
            self.flush();
        }
    }

    /// Finish the scan and return everything flushed.
    pub fn finish(mut self) -> PartitionOutput {
        self.end_dataset();
        self.output
    }

    fn end_dataset(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        match self.scheme {
            PartitionScheme::Compatible => {
                let batch = self.batch.take();
                tracing::debug!(
                    "Dropping trailing batch of {} files ({} entries) in dataset {}",
                    batch.len(),
                    batch.total_entries,
                    self.dataset.as_deref().unwrap_or_default()
                );
                self.output.dropped_files.extend(batch.files);
            }
            PartitionScheme::Balanced => self.flush(),
        }
    }

    fn flush(&mut self) {
        let batch = self.batch.take();
        let num_chunks = match self.scheme {
            PartitionScheme::Compatible => batch.last_entries / self.chunk_size + 1,
            PartitionScheme::Balanced => batch.total_entries.div_ceil(self.chunk_size),
        };

        let dataset = self.dataset.clone().unwrap_or_default();
        tracing::debug!(
            "Flushing {} files ({} entries) of dataset {} into {} chunks",
            batch.files.len(),
            batch.total_entries,
            dataset,
            num_chunks
        );

        // A batch holding no entries has nothing to chunk.
        if num_chunks == 0 {
            tracing::debug!(
                "Dropping {} files of dataset {} with no entries",
                batch.files.len(),
                dataset
            );
            self.output.dropped_files.extend(batch.files);
            return;
        }

        let chunks = (0..num_chunks)
            .map(|index| ChunkDescriptor {
                files: batch.files.clone(),
                chunk_size: self.chunk_size,
                index,
            })
            .collect();

        self.output.results.push(DeriverResult {
            dataset,
            tree: self.tree.clone(),
            chunks,
        });
    }
}

/// Partition a fully known list of `(file, entries)` pairs.
pub fn partition(
    files: &[(FileRef, u64)],
    tree: &TreeNameSpec,
    chunk_size: u64,
    scheme: PartitionScheme,
) -> Result<PartitionOutput> {
    let mut partitioner = Partitioner::new(tree.clone(), chunk_size, scheme)?;
    for (file, entries) in files {
        partitioner.push(file, *entries);
    }
    Ok(partitioner.finish())
}
