//! Core value types: input file references, tree name specs, and chunk descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

use crate::error::{ChunkingError, Result};

/// One input file within one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    /// Caller-defined dataset label
    pub dataset: String,

    /// File path or URI (local path, `file://` or `s3://`)
    pub path: String,
}

impl FileRef {
    pub fn new(dataset: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            path: path.into(),
        }
    }
}

/// Which tree to read from each file.
///
/// In config files this is either a plain string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(
    untagged,
    expecting = "invalid tree name specification: expected a tree name or a list of tree names"
)]
pub enum TreeNameSpec {
    /// Exactly this tree must exist.
    Single(String),

    /// Ordered candidates; the first listed candidate present in the file wins.
    Candidates(Vec<String>),
}

impl TreeNameSpec {
    /// Reject specs that can never resolve.
    pub fn validate(&self) -> Result<()> {
        match self {
            TreeNameSpec::Single(name) if name.is_empty() => Err(ChunkingError::InvalidSpec(
                "tree name must not be empty".to_string(),
            )),
            TreeNameSpec::Candidates(names) if names.is_empty() => Err(
                ChunkingError::InvalidSpec("candidate tree name list must not be empty".to_string()),
            ),
            TreeNameSpec::Candidates(names) if names.iter().any(|n| n.is_empty()) => Err(
                ChunkingError::InvalidSpec("candidate tree names must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Resolve the spec against the trees present in `path`.
    ///
    /// Candidates are scanned back to front and every hit replaces the
    /// previous selection, so the hit closest to the front of the list is
    /// the one returned.
    pub fn resolve<F>(&self, path: &str, has_tree: F) -> Result<&str>
    where
        F: Fn(&str) -> bool,
    {
        let selected = match self {
            TreeNameSpec::Single(name) => has_tree(name).then_some(name.as_str()),
            TreeNameSpec::Candidates(names) => {
                let mut selected = None;
                for name in names.iter().rev() {
                    if has_tree(name) {
                        selected = Some(name.as_str());
                    }
                }
                selected
            }
        };

        selected.ok_or_else(|| ChunkingError::TreeResolution {
            path: path.to_string(),
            spec: self.clone(),
        })
    }
}

impl From<&str> for TreeNameSpec {
    fn from(name: &str) -> Self {
        TreeNameSpec::Single(name.to_string())
    }
}

impl From<Vec<String>> for TreeNameSpec {
    fn from(names: Vec<String>) -> Self {
        TreeNameSpec::Candidates(names)
    }
}

impl fmt::Display for TreeNameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeNameSpec::Single(name) => write!(f, "{}", name),
            TreeNameSpec::Candidates(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// One chunk of a flushed file group, as produced by a deriver task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub files: Vec<String>,
    pub chunk_size: u64,
    pub index: u64,
}

/// Chunks for one flushed batch of a single dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriverResult {
    pub dataset: String,
    pub tree: TreeNameSpec,
    pub chunks: Vec<ChunkDescriptor>,
}

/// A flattened work unit: entries `[index * chunk_size, (index + 1) * chunk_size)`
/// across `files`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccumulatedChunk {
    pub dataset: String,
    pub files: Vec<String>,
    pub tree: TreeNameSpec,
    pub chunk_size: u64,
    pub index: u64,
}

impl AccumulatedChunk {
    /// Entry range covered by this chunk within its file group.
    pub fn entry_range(&self) -> Range<u64> {
        let start = self.index * self.chunk_size;
        start..start + self.chunk_size
    }
}

impl DeriverResult {
    /// Flatten into individual chunks, preserving chunk order.
    pub fn flatten_into(self, out: &mut Vec<AccumulatedChunk>) {
        out.extend(self.chunks.into_iter().map(|chunk| AccumulatedChunk {
            dataset: self.dataset.clone(),
            files: chunk.files,
            tree: self.tree.clone(),
            chunk_size: chunk.chunk_size,
            index: chunk.index,
        }));
    }
}
