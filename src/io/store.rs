//! Object store resolution for local and S3 input files.
//!
//! Input paths are plain local paths, `file://` URIs, or `s3://bucket/key` URIs.
//! S3 clients are built once per bucket and reused across open attempts.

use anyhow::{Context, Result};
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{ClientOptions, ObjectStore, RetryConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::StoreConfig;

/// Parse an S3 URI into bucket and key components.
///
/// Accepts URIs in the format `s3://bucket/key/path`.
pub fn parse_s3_uri(uri: &str) -> Result<(&str, &str)> {
    let without_scheme = uri
        .strip_prefix("s3://")
        .with_context(|| format!("Invalid S3 URI: expected 's3://' prefix in '{}'", uri))?;

    without_scheme
        .split_once('/')
        .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
        .with_context(|| format!("Invalid S3 URI: expected 's3://bucket/key' format in '{}'", uri))
}

/// Where an input file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation<'a> {
    S3 { bucket: &'a str, key: &'a str },
    Local(&'a str),
}

/// Classify an input path by scheme.
pub fn parse_location(uri: &str) -> Result<FileLocation<'_>> {
    if uri.starts_with("s3://") {
        let (bucket, key) = parse_s3_uri(uri)?;
        return Ok(FileLocation::S3 { bucket, key });
    }
    if let Some(local) = uri.strip_prefix("file://") {
        return Ok(FileLocation::Local(local));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        anyhow::bail!("Unsupported URI scheme '{}' in '{}'", scheme, uri);
    }
    Ok(FileLocation::Local(uri))
}

/// Client options for metadata reads: small requests, short timeouts.
///
/// The request timeout stays above the opener's per-attempt bound so the
/// attempt timeout is what normally fires.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        .with_timeout(Duration::from_secs(30))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(64)
}

/// Transport-level retries; attempt-level retries live in the opener.
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(30),
    }
}

/// Create an S3 client for one bucket.
///
/// Credentials are loaded from the environment unless `skip_signature` is set.
pub fn create_s3_store(bucket: &str, config: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating S3 client for bucket: {}", bucket);

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(&config.region)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_skip_signature(config.skip_signature);

    if let Some(endpoint) = &config.endpoint_url {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }

    Ok(Arc::new(builder.build()?))
}

/// Resolves input paths to a store and an object path within it.
pub struct StoreRegistry {
    config: StoreConfig,
    local: Arc<dyn ObjectStore>,
    s3: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl StoreRegistry {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            local: Arc::new(LocalFileSystem::new()),
            s3: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `uri` to its store and object path.
    pub fn resolve(&self, uri: &str) -> Result<(Arc<dyn ObjectStore>, Path)> {
        match parse_location(uri)? {
            FileLocation::S3 { bucket, key } => {
                let store = self.s3_store(bucket)?;
                Ok((store, Path::from(key)))
            }
            FileLocation::Local(local) => {
                let path = Path::from_filesystem_path(local)
                    .with_context(|| format!("Invalid local path '{}'", local))?;
                Ok((self.local.clone(), path))
            }
        }
    }

    fn s3_store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self
            .s3
            .lock()
            .map_err(|_| anyhow::anyhow!("S3 store registry lock poisoned"))?;

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        let store = create_s3_store(bucket, &self.config)?;
        stores.insert(bucket.to_string(), store.clone());
        Ok(store)
    }
}
