//! File opening with per-attempt timeouts and a fixed retry budget.

use async_trait::async_trait;
use object_store::path::Path;
use object_store::{GetOptions, GetRange, ObjectStore};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{OpenerConfig, StoreConfig};
use crate::error::{ChunkingError, Result};
use crate::io::store::StoreRegistry;
use crate::io::tree_file::{FooterRead, ParquetTreeFile, TreeFile};
use crate::pipeline::{guard, guard_blocking, Metrics};

/// Bytes fetched from the end of a file on the first footer read.
const FOOTER_PREFETCH: usize = 64 * 1024;

/// Opens a single file. One call is one attempt.
#[async_trait]
pub trait FileOpener: Send + Sync {
    async fn open(&self, path: &str) -> Result<Arc<dyn TreeFile>>;
}

/// Opens Parquet files from local disk or S3 by reading their footer.
pub struct ObjectStoreOpener {
    stores: StoreRegistry,
}

impl ObjectStoreOpener {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            stores: StoreRegistry::new(config),
        }
    }

    async fn fetch_suffix(store: &dyn ObjectStore, location: &Path, len: usize) -> object_store::Result<Vec<u8>> {
        let options = GetOptions {
            range: Some(GetRange::Suffix(len as u64)),
            ..Default::default()
        };
        let bytes = store.get_opts(location, options).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FileOpener for ObjectStoreOpener {
    async fn open(&self, path: &str) -> Result<Arc<dyn TreeFile>> {
        let store_err = |reason: String| ChunkingError::Store {
            path: path.to_string(),
            reason,
        };

        let (store, location) = self.stores.resolve(path).map_err(|e| store_err(format!("{:#}", e)))?;

        let mut suffix_len = FOOTER_PREFETCH;
        loop {
            let tail = Self::fetch_suffix(store.as_ref(), &location, suffix_len)
                .await
                .map_err(|e| store_err(e.to_string()))?;
            let whole_file = tail.len() < suffix_len;

            let owned_path = path.to_string();
            let read = guard_blocking(None, move || ParquetTreeFile::from_tail(&owned_path, &tail))
                .await?
                .map_err(|e| store_err(format!("{:#}", e)))?;

            match read {
                FooterRead::Complete(file) => return Ok(Arc::new(file)),
                FooterRead::NeedSuffix(needed) if !whole_file && needed > suffix_len => {
                    tracing::debug!("Footer of {} needs {} bytes, refetching", path, needed);
                    suffix_len = needed;
                }
                FooterRead::NeedSuffix(_) => {
                    return Err(store_err("Parquet footer larger than the file".to_string()));
                }
            }
        }
    }
}

/// Retry policy for [`RetryingOpener`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    pub max_attempts: usize,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&OpenerConfig::default())
    }
}

impl From<&OpenerConfig> for RetryPolicy {
    fn from(config: &OpenerConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_millis(config.attempt_timeout_ms),
            max_attempts: config.max_attempts,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Wraps a [`FileOpener`] with bounded attempts.
///
/// Attempts that error or exceed `attempt_timeout` are retried until
/// `max_attempts` is spent. The handle from the successful attempt is
/// returned as-is.
pub struct RetryingOpener {
    inner: Arc<dyn FileOpener>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl RetryingOpener {
    pub fn new(inner: Arc<dyn FileOpener>, policy: RetryPolicy, metrics: Arc<Metrics>) -> Self {
        Self { inner, policy, metrics }
    }

    /// Open `path`, retrying failed or timed-out attempts.
    pub async fn open_with_retry(&self, path: &str) -> Result<Arc<dyn TreeFile>> {
        let start = Instant::now();
        let mut last_reason = String::from("no attempts made");

        for attempt in 1..=self.policy.max_attempts {
            self.metrics.add_open_attempt();

            match guard(Some(self.policy.attempt_timeout), self.inner.open(path)).await {
                Ok(file) => {
                    self.metrics.add_file_opened();
                    self.metrics.add_open_time(start.elapsed());
                    if attempt > 1 {
                        tracing::info!("Opened {} on attempt {}", path, attempt);
                    }
                    return Ok(file);
                }
                Err(e) => {
                    self.metrics.add_open_failure();
                    last_reason = e.to_string();
                    tracing::warn!(
                        "Open attempt {}/{} for {} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        path,
                        e
                    );
                }
            }

            if attempt < self.policy.max_attempts && !self.policy.backoff.is_zero() {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        self.metrics.add_open_time(start.elapsed());
        tracing::error!(
            "Unable to open {} after {} attempts",
            path,
            self.policy.max_attempts
        );

        Err(ChunkingError::FileOpen {
            path: path.to_string(),
            attempts: self.policy.max_attempts,
            reason: last_reason,
        })
    }
}
