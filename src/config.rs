//! Configuration for the chunk planner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::pipeline::PartitionScheme;
use crate::types::{FileRef, TreeNameSpec};

/// Main configuration for a chunking run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Input datasets
    pub input: InputConfig,

    /// Chunking parameters
    pub chunking: ChunkingConfig,

    /// File opening retry policy
    #[serde(default)]
    pub opener: OpenerConfig,

    /// Worker pool configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Object store settings for `s3://` inputs
    #[serde(default)]
    pub store: StoreConfig,

    /// Where to write the chunk list
    #[serde(default)]
    pub output: OutputConfig,
}

/// Input datasets, in scan order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputConfig {
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// One dataset and its files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset label attached to every chunk
    pub name: String,

    /// File paths or URIs, in scan order
    pub files: Vec<String>,
}

/// Chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Tree name, or an ordered list of candidate names
    pub tree_name: TreeNameSpec,

    /// Target number of entries per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Batch flushing scheme
    #[serde(default)]
    pub scheme: PartitionScheme,

    /// Wall-clock bound for each deriver task, in milliseconds
    #[serde(default)]
    pub task_timeout_ms: Option<u64>,

    /// Log a progress line per completed task
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Split a dataset into several deriver tasks of at most this many files.
    /// Each split starts a fresh batch.
    #[serde(default)]
    pub max_files_per_task: Option<usize>,
}

impl ChunkingConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

/// Retry policy for opening a single file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenerConfig {
    /// Bound on each open attempt, in milliseconds
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Attempts before giving up on a file
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Pause between attempts, in milliseconds
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Default for OpenerConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 5000,
            max_attempts: 5,
            backoff_ms: 0,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Number of deriver tasks allowed to run at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Number of Tokio worker threads
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// How long cleanup waits for in-flight tasks, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Print a metrics summary after the run
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Optional path to save metrics JSON after run completes
    #[serde(default)]
    pub metrics_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            worker_threads: None,
            shutdown_timeout_secs: 10,
            enable_metrics: true,
            metrics_output_path: None,
        }
    }
}

/// Object store settings used for `s3://` inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Custom S3 endpoint (LocalStack, MinIO, ...)
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Skip request signing (public buckets)
    #[serde(default)]
    pub skip_signature: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            skip_signature: false,
        }
    }
}

/// Chunk list destination.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON output path; stdout if unset
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Flatten the dataset list into file references, preserving order.
    pub fn file_refs(&self) -> Vec<FileRef> {
        self.input
            .datasets
            .iter()
            .flat_map(|ds| ds.files.iter().map(move |f| FileRef::new(ds.name.clone(), f.clone())))
            .collect()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunking.chunk_size == 0 {
            anyhow::bail!("Chunk size must be > 0");
        }
        self.chunking.tree_name.validate()?;
        if self.chunking.max_files_per_task == Some(0) {
            anyhow::bail!("max_files_per_task must be > 0 when set");
        }
        if self.opener.max_attempts == 0 {
            anyhow::bail!("Opener max_attempts must be > 0");
        }
        if self.opener.attempt_timeout_ms == 0 {
            anyhow::bail!("Opener attempt_timeout_ms must be > 0");
        }
        if self.processing.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }
        if let Some(ds) = self.input.datasets.iter().find(|ds| ds.name.is_empty()) {
            anyhow::bail!("Dataset with files {:?} has an empty name", ds.files);
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_chunk_size() -> u64 { 100_000 }
fn default_true() -> bool { true }
fn default_attempt_timeout_ms() -> u64 { 5000 }
fn default_max_attempts() -> usize { 5 }
fn default_concurrency() -> usize { 16 }
fn default_shutdown_timeout_secs() -> u64 { 10 }
fn default_region() -> String { "us-east-1".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
input:
  datasets:
    - name: ZJets
      files: [a.parquet, b.parquet]
    - name: Data
      files: [s3://bucket/c.parquet]
chunking:
  tree_name: [Events, Tree]
  chunk_size: 500
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.scheme, PartitionScheme::Compatible);
        assert!(config.chunking.show_progress);
        assert!(config.chunking.task_timeout().is_none());
        assert_eq!(config.opener.max_attempts, 5);
        assert_eq!(config.opener.attempt_timeout_ms, 5000);
        assert_eq!(config.opener.backoff_ms, 0);
        assert_eq!(config.processing.concurrency, 16);
        assert!(config.output.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_refs_preserve_order() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let refs = config.file_refs();

        assert_eq!(
            refs,
            vec![
                FileRef::new("ZJets", "a.parquet"),
                FileRef::new("ZJets", "b.parquet"),
                FileRef::new("Data", "s3://bucket/c.parquet"),
            ]
        );
    }

    #[test]
    fn test_json_roundtrip_through_yaml() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let yaml = config.to_yaml().unwrap();
        let again = Config::from_yaml(&yaml).unwrap();
        assert_eq!(again.chunking.tree_name, config.chunking.tree_name);

        let json = serde_json::to_string(&config).unwrap();
        let from_json = Config::from_json(&json).unwrap();
        assert_eq!(from_json.file_refs().len(), 3);
    }

    #[test]
    fn test_config_validation_invalid() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.chunking.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.chunking.tree_name = TreeNameSpec::Candidates(vec![]);
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.opener.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.chunking.max_files_per_task = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tree_name_of_wrong_shape_rejected() {
        let yaml = SAMPLE.replace("tree_name: [Events, Tree]", "tree_name: {a: 1}");
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid tree name specification"));
    }

    #[test]
    fn test_task_timeout_conversion() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.chunking.task_timeout_ms = Some(1500);
        assert_eq!(config.chunking.task_timeout(), Some(Duration::from_millis(1500)));
    }
}
