use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::info;

use rawlake_core::config::{AwsConfig, StorageConfig, WriteMode};

use crate::error::StorageError;

/// Unified storage backend wrapping object_store.
pub enum StorageBackend {
    Local(LocalBackend),
    S3(S3Backend),
    Memory(Arc<InMemory>),
}

impl StorageBackend {
    /// Select S3 when a bucket is configured, the local filesystem otherwise.
    pub fn from_config(aws: &AwsConfig, storage: &StorageConfig) -> Result<Self, StorageError> {
        if storage.is_remote() {
            Ok(StorageBackend::S3(S3Backend::new(aws, storage)?))
        } else {
            Ok(StorageBackend::Local(LocalBackend::new(&storage.data_dir)?))
        }
    }

    pub fn memory() -> Self {
        StorageBackend::Memory(Arc::new(InMemory::new()))
    }

    /// Get the underlying ObjectStore.
    pub fn store(&self) -> &dyn ObjectStore {
        match self {
            StorageBackend::Local(b) => b.store.as_ref(),
            StorageBackend::S3(b) => b.store.as_ref(),
            StorageBackend::Memory(m) => m.as_ref(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageBackend::S3(_))
    }

    /// Whether object attributes (content type, encoding, user metadata) can
    /// be written. The local filesystem stores bytes only.
    pub fn supports_attributes(&self) -> bool {
        !matches!(self, StorageBackend::Local(_))
    }

    pub fn label(&self) -> String {
        match self {
            StorageBackend::Local(b) => format!("file://{}", b.data_dir.display()),
            StorageBackend::S3(b) => format!("s3://{}", b.bucket),
            StorageBackend::Memory(_) => "memory://".to_string(),
        }
    }
}

/// Local filesystem backend.
pub struct LocalBackend {
    pub store: Arc<dyn ObjectStore>,
    pub data_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let canonical = std::fs::canonicalize(data_dir)?;
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        info!("Storage: local backend at {}", canonical.display());
        Ok(Self {
            store: Arc::new(store),
            data_dir: canonical,
        })
    }
}

/// S3 backend.
pub struct S3Backend {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl S3Backend {
    pub fn new(aws: &AwsConfig, storage: &StorageConfig) -> Result<Self, StorageError> {
        let bucket = storage
            .bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("DATA_LAKE_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        if let Some(ref endpoint) = aws.endpoint_url {
            // Ensure endpoint has a scheme; object_store requires absolute URLs
            let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("https://{}", endpoint)
            };
            builder = builder
                .with_bucket_name(bucket)
                .with_endpoint(&endpoint_url)
                .with_allow_http(endpoint_url.starts_with("http://"));
        } else {
            // Standard AWS S3: use with_url for proper endpoint resolution
            builder = builder.with_url(format!("s3://{}", bucket));
        }

        if storage.write_mode == WriteMode::CreateIfAbsent {
            builder = builder.with_conditional_put(S3ConditionalPut::ETagMatch);
        }

        let store = builder.build()?;

        info!(
            "Storage: S3 backend s3://{} (region: {}, write_mode: {})",
            bucket, aws.region, storage.write_mode
        );

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }
}
