//! `colorforge-storage` — idempotent object storage for generated assets.
//!
//! A thin facade over [`object_store`]: the production backend is any
//! S3-compatible store (R2 included); tests use the in-memory backend.
//! `put_object` pre-checks existence so re-entrant uploads after a crash
//! never duplicate storage objects.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use thiserror::Error;
use tracing::debug;

use colorforge_retry::Retryable;

/// S3-compatible backend configuration (R2-style endpoint + public CDN URL).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Base URL under which uploaded keys are publicly reachable.
    pub public_base_url: String,
    pub region: String,
}

impl StorageConfig {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            public_base_url: public_base_url.into(),
            region: "auto".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Config(String),

    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),
}

impl Retryable for StorageError {
    fn is_retryable(&self) -> bool {
        match self {
            StorageError::Config(_) => false,
            StorageError::Backend(err) => !matches!(
                err,
                object_store::Error::NotFound { .. }
                    | object_store::Error::AlreadyExists { .. }
                    | object_store::Error::Precondition { .. }
                    | object_store::Error::NotSupported { .. }
                    | object_store::Error::InvalidPath { .. }
            ),
        }
    }
}

/// Object storage handle used by the upload step.
#[derive(Clone)]
pub struct AssetStorage {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl AssetStorage {
    /// Connect to an S3-compatible bucket.
    pub fn s3_compatible(config: StorageConfig) -> Result<Self, StorageError> {
        if config.public_base_url.is_empty() {
            return Err(StorageError::Config("public base URL must not be empty".to_string()));
        }
        let store = object_store::aws::AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region)
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// In-memory backend for tests/dev.
    pub fn in_memory(public_base_url: impl Into<String>) -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upload bytes under `key` and return the public URL.
    ///
    /// Idempotent: if the key already exists the upload is skipped and the
    /// existing object's URL is returned.
    pub async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        if self.exists(key).await? {
            debug!(key, "object already exists, skipping upload");
            return Ok(self.public_url(key));
        }

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions { attributes, ..Default::default() };

        let size = bytes.len();
        self.store
            .put_opts(&ObjectPath::from(key), bytes.into(), options)
            .await?;
        debug!(key, size, content_type, "uploaded object");

        Ok(self.public_url(key))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.store.delete(&ObjectPath::from(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

impl std::fmt::Debug for AssetStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStorage")
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}
