//! Durable object storage with idempotent record writes.
//!
//! [`ObjectStore`] is the narrow seam the pipeline needs from a store:
//! `exists`, `put`, and a start-of-run `probe`. Three implementations:
//!
//! - [`FsObjectStore`]: a local directory, keys mapped to file paths
//! - [`MemoryStore`]: in-process map for tests and dry runs
//! - [`s3::S3Store`]: an S3 bucket, behind the `aws` feature
//!
//! [`StoreWriter`] layers the idempotency protocol on top: serialize the
//! record canonically, check existence, write only when absent. The
//! check-then-write is racy across concurrent invocations of the same
//! target; within one invocation keys are target-scoped and each target
//! is processed by a single task, so the race cannot occur in-core.

use crate::errors::StoreError;
use crate::models::{Record, StorageKey, WriteOutcome};
use crate::utils::ensure_writable_dir;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, info, instrument};

/// The object-store operations the sync pipeline relies on.
///
/// One logical bucket, string keys. Versioning and lifecycle policy are
/// the store's own concern.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object already exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Write `bytes` under `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Cheap health check run before any target is attempted. A probe
    /// failure aborts the whole run.
    async fn probe(&self) -> Result<(), StoreError>;
}

/// Object store backed by a local directory.
///
/// Keys contain `/` separators which map directly onto subdirectories.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.object_path(key);
        fs::try_exists(&path)
            .await
            .map_err(|e| Self::io_error(&path, e))
    }

    #[instrument(level = "debug", skip_all, fields(key = %key))]
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error(parent, e))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| Self::io_error(&path, e))?;
        debug!(path = %path.display(), "Wrote object");
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        ensure_writable_dir(&self.root)
            .await
            .map_err(|e| Self::io_error(&self.root, e))
    }
}

/// In-memory object store for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Snapshot of the stored objects.
    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        self.objects.lock().unwrap().clone()
    }

    /// Pre-seed an object, e.g. to simulate a previous run.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn probe(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Persists records under their derived keys, skipping keys that already
/// exist so repeated runs never duplicate objects or re-pay upload costs.
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn ObjectStore>,
}

impl StoreWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        StoreWriter { store }
    }

    /// Delegated start-of-run health check.
    pub async fn probe(&self) -> Result<(), StoreError> {
        self.store.probe().await
    }

    /// Serialize and persist one record, unless its key is already present.
    #[instrument(level = "info", skip_all, fields(key = %key))]
    pub async fn write(
        &self,
        key: &StorageKey,
        record: &Record,
    ) -> Result<WriteOutcome, StoreError> {
        if self.store.exists(key.as_str()).await? {
            debug!("Key already present; skipping write");
            return Ok(WriteOutcome::Skipped);
        }
        let bytes = serde_json::to_vec(record)?;
        self.store.put(key.as_str(), bytes).await?;
        info!("Created object");
        Ok(WriteOutcome::Created)
    }
}

/// S3-backed object store, available with the `aws` feature.
#[cfg(feature = "aws")]
pub mod s3 {
    use super::ObjectStore;
    use crate::errors::StoreError;
    use async_trait::async_trait;
    use aws_sdk_s3::{Client, primitives::ByteStream};
    use tracing::{debug, instrument};

    /// Object store addressed as a single S3 bucket.
    #[derive(Clone)]
    pub struct S3Store {
        client: Client,
        bucket: String,
    }

    impl S3Store {
        pub fn new(client: Client, bucket: impl Into<String>) -> Self {
            S3Store {
                client,
                bucket: bucket.into(),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for S3Store {
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => {
                    let msg = e.to_string();
                    if msg.contains("NotFound") || msg.contains("404") {
                        Ok(false)
                    } else {
                        Err(StoreError::Backend(format!(
                            "s3 head s3://{}/{}: {msg}",
                            self.bucket, key
                        )))
                    }
                }
            }
        }

        #[instrument(level = "debug", skip_all, fields(key = %key))]
        async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_type("application/json")
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|e| {
                    StoreError::Backend(format!("s3 put s3://{}/{}: {e}", self.bucket, key))
                })?;
            debug!(bucket = %self.bucket, "Uploaded object");
            Ok(())
        }

        async fn probe(&self) -> Result<(), StoreError> {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| {
                    StoreError::Backend(format!("s3 bucket {} unreachable: {e}", self.bucket))
                })?;
            Ok(())
        }
    }
}
