//! Test fixtures: scripted openers and on-disk Parquet files.

use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::ArrowWriter;
use parquet::format::KeyValue;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ChunkingError, Result};
use crate::io::{FileOpener, TreeFile, TreeInfo, TREE_NAME_KEY};

/// Tree file held entirely in memory.
#[derive(Debug)]
pub struct InMemoryTreeFile {
    path: String,
    trees: Vec<TreeInfo>,
}

impl InMemoryTreeFile {
    pub fn new(path: &str, trees: &[(&str, u64)]) -> Self {
        Self {
            path: path.to_string(),
            trees: trees
                .iter()
                .map(|(name, n)| TreeInfo {
                    name: name.to_string(),
                    num_entries: *n,
                })
                .collect(),
        }
    }
}

impl TreeFile for InMemoryTreeFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn tree_names(&self) -> Vec<String> {
        self.trees.iter().map(|t| t.name.clone()).collect()
    }

    fn tree(&self, name: &str) -> Option<TreeInfo> {
        self.trees.iter().find(|t| t.name == name).cloned()
    }
}

/// How a scripted path responds to open attempts.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Open immediately.
    Trees(Vec<(&'static str, u64)>),
    /// Open after sleeping.
    Delayed(Duration, Vec<(&'static str, u64)>),
    /// Fail the first `failures` attempts, then open.
    FailThen {
        failures: usize,
        trees: Vec<(&'static str, u64)>,
    },
    /// Never return on the first `hangs` attempts, then open.
    HangThen {
        hangs: usize,
        trees: Vec<(&'static str, u64)>,
    },
    AlwaysFail,
    Hang,
}

/// [`FileOpener`] whose responses are scripted per path.
///
/// Unscripted paths fail like a missing file.
#[derive(Default)]
pub struct ScriptedOpener {
    scripts: Mutex<HashMap<String, Behavior>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl ScriptedOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, path: &str, behavior: Behavior) {
        self.scripts.lock().unwrap().insert(path.to_string(), behavior);
    }

    pub fn attempts(&self, path: &str) -> usize {
        self.attempts.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    fn record_attempt(&self, path: &str) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        let n = attempts.entry(path.to_string()).or_insert(0);
        *n += 1;
        *n
    }
}

fn scripted_failure(path: &str, attempt: usize) -> ChunkingError {
    ChunkingError::Store {
        path: path.to_string(),
        reason: format!("scripted failure on attempt {}", attempt),
    }
}

fn opened(path: &str, trees: &[(&str, u64)]) -> Arc<dyn TreeFile> {
    Arc::new(InMemoryTreeFile::new(path, trees))
}

#[async_trait]
impl FileOpener for ScriptedOpener {
    async fn open(&self, path: &str) -> Result<Arc<dyn TreeFile>> {
        let attempt = self.record_attempt(path);
        let behavior = self.scripts.lock().unwrap().get(path).cloned();

        match behavior {
            None => Err(ChunkingError::Store {
                path: path.to_string(),
                reason: "not found".to_string(),
            }),
            Some(Behavior::Trees(trees)) => Ok(opened(path, &trees)),
            Some(Behavior::Delayed(delay, trees)) => {
                tokio::time::sleep(delay).await;
                Ok(opened(path, &trees))
            }
            Some(Behavior::FailThen { failures, trees }) => {
                if attempt <= failures {
                    Err(scripted_failure(path, attempt))
                } else {
                    Ok(opened(path, &trees))
                }
            }
            Some(Behavior::HangThen { hangs, trees }) => {
                if attempt <= hangs {
                    std::future::pending::<()>().await;
                }
                Ok(opened(path, &trees))
            }
            Some(Behavior::AlwaysFail) => Err(scripted_failure(path, attempt)),
            Some(Behavior::Hang) => std::future::pending().await,
        }
    }
}

/// Encode a single-column Parquet file with `rows` rows.
///
/// `tree_name` is stored under the `tree_name` key-value metadata entry.
pub fn parquet_bytes(rows: usize, tree_name: Option<&str>) -> Vec<u8> {
    let schema = Arc::new(Schema::new(vec![Field::new("entry", DataType::Int64, false)]));
    let column = Int64Array::from_iter_values(0..rows as i64);
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(column)]).unwrap();

    let kv = tree_name.map(|name| vec![KeyValue::new(TREE_NAME_KEY.to_string(), name.to_string())]);
    let props = WriterProperties::builder().set_key_value_metadata(kv).build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props)).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    buf
}

/// Write a Parquet fixture into `dir` and return its path as a string.
pub fn write_parquet(dir: &Path, name: &str, rows: usize, tree_name: Option<&str>) -> String {
    let path = dir.join(name);
    std::fs::write(&path, parquet_bytes(rows, tree_name)).unwrap();
    path.to_str().unwrap().to_string()
}
