//! Durable, content-addressed storage of fetched pages.
//!
//! Presence of a key is the only idempotency signal: the worker checks
//! [`DurableStore::exists`] before fetching and never deliberately rewrites
//! a key. Two workers racing on the same unit may both write; with
//! [`WriteMode::Overwrite`] the second write replaces identical content,
//! with [`WriteMode::CreateIfAbsent`] the second write is refused and
//! reported as not created.

use std::borrow::Cow;

use async_trait::async_trait;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, PutMode, PutOptions, PutPayload};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use rawlake_core::config::{AwsConfig, StorageConfig, WriteMode};
use rawlake_core::StorageKey;

use crate::backend::StorageBackend;
use crate::codec::{self, CONTENT_ENCODING, CONTENT_HASH_METADATA, CONTENT_TYPE};
use crate::error::StorageError;

/// Result of a successful `put`.
#[derive(Debug, Clone, Serialize)]
pub struct PutReceipt {
    pub key: StorageKey,
    pub content_hash: String,
    pub size_bytes: usize,
    /// False when create-if-absent found the key already written.
    pub created: bool,
}

/// An object read back from the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: StorageKey,
    pub document: Value,
    /// Digest recorded at write time, or recomputed when the backend keeps
    /// no metadata.
    pub content_hash: String,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub size_bytes: usize,
}

/// Existence check and write of compressed documents under a key.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// `Ok(false)` only for a clean "not found"; every other failure is an error.
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// Encode, compress and write `document` under `key`.
    async fn put(&self, key: &StorageKey, document: &Value) -> Result<PutReceipt, StorageError>;
}

/// [`DurableStore`] over an object_store backend.
pub struct RawStore {
    backend: StorageBackend,
    write_mode: WriteMode,
    prefix: String,
}

impl RawStore {
    pub fn new(backend: StorageBackend, write_mode: WriteMode) -> Self {
        info!(backend = %backend.label(), write_mode = %write_mode, "Raw store ready");
        Self {
            backend,
            write_mode,
            prefix: String::new(),
        }
    }

    /// Backend from `DATA_LAKE_BUCKET` / `DATA_DIR`, keys under `DATA_LAKE_PREFIX`.
    pub fn from_config(aws: &AwsConfig, storage: &StorageConfig) -> Result<Self, StorageError> {
        let backend = StorageBackend::from_config(aws, storage)?;
        Self::new(backend, storage.write_mode).with_prefix(storage.prefix.as_deref().unwrap_or(""))
    }

    /// Place every key under `prefix` (slashes at either end are ignored).
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self, StorageError> {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            ObjectPath::parse(prefix).map_err(|e| StorageError::InvalidKey {
                key: prefix.to_string(),
                reason: e.to_string(),
            })?;
            info!(prefix, "Raw store key prefix");
        }
        self.prefix = prefix.to_string();
        Ok(self)
    }

    /// Ephemeral store for tests and local demos.
    pub fn in_memory(write_mode: WriteMode) -> Self {
        Self::new(StorageBackend::memory(), write_mode)
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Backend label plus key prefix, for logs.
    pub fn label(&self) -> String {
        if self.prefix.is_empty() {
            self.backend.label()
        } else {
            format!("{}/{}", self.backend.label(), self.prefix)
        }
    }

    /// Object location for a key, prefix included.
    ///
    /// The key is used verbatim. A key object_store cannot represent without
    /// re-encoding is rejected rather than written somewhere else.
    pub fn location(&self, key: &StorageKey) -> Result<ObjectPath, StorageError> {
        let raw = if self.prefix.is_empty() {
            key.as_str().to_string()
        } else {
            format!("{}/{}", self.prefix, key.as_str())
        };
        let invalid = |reason: String| StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        let location = ObjectPath::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        if location.as_ref() != raw.as_str() {
            return Err(invalid(format!("normalized to '{location}'")));
        }
        Ok(location)
    }

    fn attributes(&self, content_hash: &str) -> Attributes {
        let mut attributes = Attributes::new();
        if self.backend.supports_attributes() {
            attributes.insert(Attribute::ContentType, CONTENT_TYPE.into());
            attributes.insert(Attribute::ContentEncoding, CONTENT_ENCODING.into());
            attributes.insert(
                Attribute::Metadata(Cow::Borrowed(CONTENT_HASH_METADATA)),
                content_hash.to_string().into(),
            );
        }
        attributes
    }

    /// Read an object back and decode it.
    pub async fn get(&self, key: &StorageKey) -> Result<StoredObject, StorageError> {
        let result = self.backend.store().get(&self.location(key)?).await?;
        let attributes = result.attributes.clone();
        let bytes = result.bytes().await?;

        let document = codec::decode(&bytes)?;
        let recorded_hash = attribute(&attributes, &Attribute::Metadata(Cow::Borrowed(CONTENT_HASH_METADATA)));

        Ok(StoredObject {
            key: key.clone(),
            document,
            content_hash: recorded_hash.unwrap_or_else(|| codec::content_hash(&bytes)),
            content_type: attribute(&attributes, &Attribute::ContentType),
            content_encoding: attribute(&attributes, &Attribute::ContentEncoding),
            size_bytes: bytes.len(),
        })
    }
}

fn attribute(attributes: &Attributes, key: &Attribute) -> Option<String> {
    attributes
        .get(key)
        .map(|value| AsRef::<str>::as_ref(value).to_string())
}

#[async_trait]
impl DurableStore for RawStore {
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        match self.backend.store().head(&self.location(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ObjectStore(e)),
        }
    }

    async fn put(&self, key: &StorageKey, document: &Value) -> Result<PutReceipt, StorageError> {
        let encoded = codec::encode(document)?;
        let size_bytes = encoded.bytes.len();
        let mode = match self.write_mode {
            WriteMode::Overwrite => PutMode::Overwrite,
            WriteMode::CreateIfAbsent => PutMode::Create,
        };
        let opts = PutOptions {
            mode,
            attributes: self.attributes(&encoded.content_hash),
            ..Default::default()
        };

        let location = self.location(key)?;
        let created = match self
            .backend
            .store()
            .put_opts(&location, PutPayload::from(encoded.bytes), opts)
            .await
        {
            Ok(_) => true,
            Err(object_store::Error::AlreadyExists { .. }) => {
                debug!(key = %key, "Conditional put found existing object");
                false
            }
            Err(e) => return Err(StorageError::ObjectStore(e)),
        };

        debug!(
            key = %key,
            size_bytes,
            content_hash = %encoded.content_hash,
            created,
            "Stored object"
        );

        Ok(PutReceipt {
            key: key.clone(),
            content_hash: encoded.content_hash,
            size_bytes,
            created,
        })
    }
}
