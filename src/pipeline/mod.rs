//! Task dispatch, chunk derivation, and result collection.

mod chunker;
mod deriver;
mod metrics;
mod partition;
mod pool;
mod scheduler;
mod timeout;


pub use chunker::{split_tasks, Chunker, ChunkingReport};
pub use deriver::ChunkDeriver;
pub use metrics::{Metrics, MetricsSnapshot, ProgressReporter};
pub use partition::{partition, PartitionBatch, PartitionOutput, PartitionScheme, Partitioner};
pub use pool::{TaskHandle, TaskOutcome, TaskSubmitter, WorkerPool};
pub use scheduler::{run_and_accumulate, ProgressConfig, SchedulerStats, TaskFailure};
pub use timeout::{guard, guard_blocking};
