//! Chunk planner CLI
//!
//! Partitions Parquet files into fixed-size entry chunks and writes the chunk list as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chunkplan::{run_chunking, Config};

#[derive(Parser)]
#[command(name = "chunkplan")]
#[command(about = "Partition columnar data files into fixed-size entry chunks", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override chunk size
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    /// Override output path for the chunk list
    #[arg(long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the chunk list (default if no command specified)
    Run,

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short = 'o', long, default_value = "config.yaml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging on stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            run_command(config)?;
        }

        Some(Commands::Validate) => {
            let config = load_config(&cli)?;
            validate_command(&config)?;
        }

        Some(Commands::GenerateConfig { path }) => {
            generate_config_command(path.clone())?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    // Apply overrides
    if let Some(c) = cli.concurrency {
        config.processing.concurrency = c;
    }
    if let Some(size) = cli.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(output) = &cli.output {
        config.output.path = Some(output.clone());
    }

    Ok(config)
}

fn run_command(config: Config) -> Result<()> {
    let report = run_chunking(&config)?;

    let json = serde_json::to_string_pretty(&report.chunks)?;
    match &config.output.path {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write chunk list to {}", path))?;
            tracing::info!("Wrote {} chunks to {}", report.chunks.len(), path);
        }
        None => println!("{}", json),
    }

    if config.processing.enable_metrics {
        report.metrics.print_summary();
    }
    if let Some(path) = &config.processing.metrics_output_path {
        report.metrics.save_to_file(path)?;
    }

    if !report.stats.all_succeeded() {
        tracing::warn!("{} of {} tasks failed", report.stats.tasks_failed, report.stats.total_tasks);
        for failure in &report.stats.failures {
            tracing::warn!("  task {}: {}", failure.task_id, failure.error);
        }
    }

    Ok(())
}

fn validate_command(config: &Config) -> Result<()> {
    config.validate()?;
    println!(
        "Configuration is valid: {} datasets, {} files",
        config.input.datasets.len(),
        config.file_refs().len()
    );
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# Chunk planner configuration

# === INPUT: Files to partition, grouped by dataset ===
# Paths may be local, file:// or s3://bucket/key
input:
  datasets:
    - name: ZJets
      files:
        - "/data/zjets/part-0000.parquet"
        - "/data/zjets/part-0001.parquet"
    - name: Data2018
      files:
        - "s3://my-bucket/data2018/part-0000.parquet"

# === CHUNKING ===
chunking:
  # Tree to read from each file; a list means "first listed name present wins"
  tree_name: Events
  # tree_name: [Events, Tree]

  # Target entries per chunk
  chunk_size: 100000

  # compatible: flush when the batch exceeds chunk_size, chunk count from the
  #             last file, trailing batch dropped
  # balanced:   flush when the batch reaches chunk_size, chunk count from the
  #             batch total, trailing batch kept
  scheme: compatible

  # Wall-clock bound for each deriver task (milliseconds)
  # task_timeout_ms: 600000

  # Log one progress line per finished task
  show_progress: true

  # Split each dataset into tasks of at most this many files
  # max_files_per_task: 500

# === OPENER: Per-file retry policy ===
opener:
  attempt_timeout_ms: 5000
  max_attempts: 5
  backoff_ms: 0

# === PROCESSING: Worker pool ===
processing:
  # Deriver tasks running at once
  concurrency: 16

  # Tokio worker threads (null = num CPUs)
  # worker_threads: 8

  # Print a summary after the run
  enable_metrics: true

  # metrics_output_path: "metrics.json"

# === STORE: S3 connection settings ===
store:
  region: "us-east-1"
  # endpoint_url: "http://localhost:9000"
  skip_signature: false

# === OUTPUT ===
# Chunk list JSON; stdout when path is unset
output: {}
# output:
#   path: "chunks.json"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
