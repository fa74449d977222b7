//! Collection of dispatched tasks into a single accumulator.
//!
//! Completions are processed in the order they finish, not the order they
//! were submitted. A failed task is logged and counted; it never stops the
//! remaining tasks from being collected.

use futures::stream::{FuturesUnordered, StreamExt};

use crate::pipeline::{Metrics, ProgressReporter, TaskHandle};

/// Labels for the per-completion progress line.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    pub title: String,
    pub unit: String,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            title: "Preprocessing".to_string(),
            unit: "tasks".to_string(),
        }
    }
}

/// A task that did not contribute to the accumulator.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: usize,
    pub error: String,
    pub timed_out: bool,
}

/// Statistics from a collection run.
#[derive(Debug, Default, Clone)]
pub struct SchedulerStats {
    /// Tasks collected
    pub total_tasks: usize,

    /// Tasks folded into the accumulator
    pub tasks_succeeded: usize,

    /// Tasks that failed
    pub tasks_failed: usize,

    /// Failure details, in completion order
    pub failures: Vec<TaskFailure>,
}

impl SchedulerStats {
    pub fn all_succeeded(&self) -> bool {
        self.tasks_failed == 0
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Succeeded: {}, Failed: {}, Total: {}",
            self.tasks_succeeded, self.tasks_failed, self.total_tasks
        )
    }
}

/// Await every task in `tasks`, folding each successful result into `acc`
/// with `combine`.
///
/// `combine` runs exactly once per successful task, on the collecting task,
/// so the accumulator needs no synchronization.
pub async fn run_and_accumulate<T, A, F>(
    tasks: Vec<TaskHandle<T>>,
    mut acc: A,
    mut combine: F,
    progress: Option<&ProgressConfig>,
    metrics: &Metrics,
) -> (A, SchedulerStats)
where
    F: FnMut(&mut A, T),
{
    let total_tasks = tasks.len();
    let reporter = progress.map(|p| ProgressReporter::new(p.title.clone(), p.unit.clone(), total_tasks));

    let mut stats = SchedulerStats {
        total_tasks,
        ..Default::default()
    };

    let mut pending: FuturesUnordered<TaskHandle<T>> = tasks.into_iter().collect();

    while let Some(outcome) = pending.next().await {
        match outcome.result {
            Ok(result) => {
                combine(&mut acc, result);
                stats.tasks_succeeded += 1;
                metrics.add_task_succeeded();
            }
            Err(e) => {
                let timed_out = e.is_timeout();
                tracing::error!("Task {} failed: {}", outcome.task_id, e);
                stats.tasks_failed += 1;
                stats.failures.push(TaskFailure {
                    task_id: outcome.task_id,
                    error: e.to_string(),
                    timed_out,
                });
                metrics.add_task_failed();
                if timed_out {
                    metrics.add_task_timed_out();
                }
            }
        }

        if let Some(reporter) = &reporter {
            reporter.tick();
        }
    }

    (acc, stats)
}
