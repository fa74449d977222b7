//! Worker pool for dispatching deriver tasks.
//!
//! The pool owns a Tokio runtime and a semaphore that bounds how many
//! submitted tasks run at once. It is shut down by [`WorkerPool::cleanup`]
//! or, on any other exit path, when dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::build_runtime;
use crate::config::ProcessingConfig;
use crate::error::{ChunkingError, Result};

/// Submits units of work for remote execution.
pub trait TaskSubmitter {
    fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static;
}

/// Result of one submitted task, tagged with its id.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub task_id: usize,
    pub result: Result<T>,
}

/// Handle to a submitted task. Resolves once the task finishes.
pub struct TaskHandle<T> {
    task_id: usize,
    inner: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn task_id(&self) -> usize {
        self.task_id
    }

    /// Cancel the task. Awaiting the handle afterwards yields `TaskAborted`.
    pub fn abort(&self) {
        self.inner.abort();
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskOutcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task_id = self.task_id;
        Pin::new(&mut self.inner).poll(cx).map(|joined| {
            let result = joined.unwrap_or_else(|e| {
                let reason = if e.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    format!("panicked: {}", e)
                };
                Err(ChunkingError::TaskAborted { task_id, reason })
            });
            TaskOutcome { task_id, result }
        })
    }
}

/// Tokio-backed pool with bounded task concurrency.
pub struct WorkerPool {
    runtime: Option<Runtime>,
    permits: Arc<Semaphore>,
    next_id: AtomicUsize,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Start a pool according to `config`.
    pub fn load(config: &ProcessingConfig) -> anyhow::Result<Self> {
        if config.concurrency == 0 {
            anyhow::bail!("Concurrency must be > 0");
        }

        let runtime = build_runtime(config.worker_threads)?;
        tracing::info!(
            "Worker pool started ({} concurrent tasks, {} worker threads)",
            config.concurrency,
            config
                .worker_threads
                .map_or_else(|| "default".to_string(), |n| n.to_string())
        );

        Ok(Self {
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            next_id: AtomicUsize::new(0),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        })
    }

    /// Drive `future` to completion on the pool, blocking the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime().block_on(future)
    }

    /// Shut the pool down, waiting up to the configured timeout for running tasks.
    ///
    /// Must not be called from inside an async context.
    pub fn cleanup(mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.shutdown_timeout);
            tracing::info!("Worker pool stopped");
        }
    }

    /// Number of tasks that could start right now.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    fn runtime(&self) -> &Runtime {
        // Only `cleanup` and `drop` take the runtime, and both consume the pool.
        self.runtime.as_ref().expect("worker pool runtime present until cleanup")
    }
}

impl TaskSubmitter for WorkerPool {
    fn submit<T, F>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let permits = self.permits.clone();

        let inner = self.runtime().spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ChunkingError::TaskAborted {
                    task_id,
                    reason: "worker pool closed".to_string(),
                })?;
            task.await
        });

        TaskHandle { task_id, inner }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(concurrency: usize) -> ProcessingConfig {
        ProcessingConfig {
            concurrency,
            worker_threads: Some(2),
            ..ProcessingConfig::default()
        }
    }

    #[test]
    fn test_submit_and_await() {
        let pool = WorkerPool::load(&config(4)).unwrap();

        let handle = pool.submit(async { Ok(21 * 2) });
        let outcome = pool.block_on(handle);

        assert_eq!(outcome.task_id, 0);
        assert_eq!(outcome.result.unwrap(), 42);
        pool.cleanup();
    }

    #[test]
    fn test_task_ids_increase() {
        let pool = WorkerPool::load(&config(4)).unwrap();

        let a = pool.submit(async { Ok(()) });
        let b = pool.submit(async { Ok(()) });

        assert_eq!(a.task_id(), 0);
        assert_eq!(b.task_id(), 1);
    }

    #[test]
    fn test_panic_becomes_task_aborted() {
        let pool = WorkerPool::load(&config(1)).unwrap();

        let handle = pool.submit(async {
            if true {
                panic!("deriver crashed");
            }
            Ok(())
        });
        let outcome = pool.block_on(handle);

        assert!(matches!(outcome.result, Err(ChunkingError::TaskAborted { task_id: 0, .. })));
    }

    #[test]
    fn test_abort_becomes_task_aborted() {
        let pool = WorkerPool::load(&config(1)).unwrap();

        let handle = pool.submit(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        handle.abort();
        let outcome = pool.block_on(handle);

        match outcome.result {
            Err(ChunkingError::TaskAborted { reason, .. }) => assert_eq!(reason, "cancelled"),
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::load(&config(2)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        pool.block_on(async {
            for handle in handles {
                handle.await.result.unwrap();
            }
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available_slots(), 2);
    }

    #[test]
    fn test_drop_without_cleanup() {
        let pool = WorkerPool::load(&config(1)).unwrap();
        let _pending = pool.submit(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        drop(pool);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(WorkerPool::load(&config(0)).is_err());
    }
}
