//! Blob storage for finished shards, backed by `object_store`.
//!
//! The pipelines are synchronous, so every call is bridged onto
//! [`SHARED_RUNTIME`](crate::stream::SHARED_RUNTIME).

use std::path::Path;
use std::sync::Arc;

use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

use crate::retry::Retryable;
use crate::stream::SHARED_RUNTIME;

/// Error from a blob store operation
#[derive(Debug)]
pub enum BlobError {
    /// Backend failure (network, auth, missing object, ...)
    Store(object_store::Error),
    /// Store could not be constructed from its settings
    Config(String),
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "object store: {e}"),
            Self::Config(msg) => write!(f, "object store config: {msg}"),
        }
    }
}

impl std::error::Error for BlobError {}

impl Retryable for BlobError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => !matches!(
                e,
                object_store::Error::NotFound { .. }
                    | object_store::Error::InvalidPath { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
                    | object_store::Error::NotSupported { .. }
            ),
            Self::Config(_) => false,
        }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(e: object_store::Error) -> Self {
        Self::Store(e)
    }
}

/// Named-object sink: key + bytes → stored object.
pub trait BlobStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;
}

impl<B: BlobStore + ?Sized> BlobStore for &B {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        (**self).put(key, data)
    }
}

impl<B: BlobStore + ?Sized> BlobStore for Arc<B> {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        (**self).put(key, data)
    }
}

/// Connection settings for an S3-compatible endpoint (MinIO, AWS, ...)
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: String,
    pub region: String,
}

/// [`BlobStore`] over any `object_store` backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobs {
    inner: Arc<dyn ObjectStore>,
    label: String,
}

impl ObjectStoreBlobs {
    pub fn new(inner: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
        }
    }

    /// S3-compatible bucket. Plain-HTTP endpoints are allowed for local MinIO.
    pub fn s3(settings: &S3Settings) -> Result<Self, BlobError> {
        if settings.bucket.is_empty() {
            return Err(BlobError::Config("bucket name is empty".to_string()));
        }
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let (Some(key), Some(secret)) = (&settings.access_key, &settings.secret_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }
        let store = builder.build()?;
        Ok(Self::new(Arc::new(store), format!("s3://{}", settings.bucket)))
    }

    /// Directory on the local filesystem (created if missing).
    pub fn local(root: &Path) -> Result<Self, BlobError> {
        std::fs::create_dir_all(root)
            .map_err(|e| BlobError::Config(format!("{}: {e}", root.display())))?;
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store), root.display().to_string()))
    }

    /// Process-local store, mostly for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Probe the backend with a listing so bad credentials fail at startup.
    pub fn verify(&self) -> Result<(), BlobError> {
        SHARED_RUNTIME.handle().block_on(async {
            self.inner.list_with_delimiter(None).await?;
            Ok::<_, BlobError>(())
        })
    }

    /// Read an object back in full.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = ObjectPath::from(key);
        SHARED_RUNTIME.handle().block_on(async {
            let bytes = self.inner.get(&path).await?.bytes().await?;
            Ok::<_, BlobError>(bytes.to_vec())
        })
    }

    /// Keys under `prefix`, sorted.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>, BlobError> {
        let prefix = (!prefix.is_empty()).then(|| ObjectPath::from(prefix));
        SHARED_RUNTIME.handle().block_on(async {
            let metas: Vec<_> = self.inner.list(prefix.as_ref()).try_collect().await?;
            let mut keys: Vec<String> = metas.into_iter().map(|m| m.location.to_string()).collect();
            keys.sort();
            Ok::<_, BlobError>(keys)
        })
    }
}

impl BlobStore for ObjectStoreBlobs {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = ObjectPath::from(key);
        let payload = PutPayload::from(data.to_vec());
        SHARED_RUNTIME.handle().block_on(async {
            self.inner.put(&path, payload).await?;
            Ok::<_, BlobError>(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_put_get_list() {
        let store = ObjectStoreBlobs::in_memory();
        store.put("shards/a.tar", b"aaa").unwrap();
        store.put("shards/b.tar", b"bb").unwrap();
        store.put("other/c.tar", b"c").unwrap();

        assert_eq!(store.get("shards/a.tar").unwrap(), b"aaa");
        assert_eq!(
            store.list("shards").unwrap(),
            vec!["shards/a.tar".to_string(), "shards/b.tar".to_string()]
        );
        assert_eq!(store.list("").unwrap().len(), 3);
    }

    #[test]
    fn missing_object_not_retryable() {
        let store = ObjectStoreBlobs::in_memory();
        let err = store.get("nope").unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn generic_store_error_retryable() {
        let err = BlobError::Store(object_store::Error::Generic {
            store: "test",
            source: "connection reset".into(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn config_error_not_retryable() {
        assert!(!BlobError::Config("x".into()).is_retryable());
    }

    #[test]
    fn s3_requires_bucket() {
        let err = ObjectStoreBlobs::s3(&S3Settings::default()).unwrap_err();
        assert!(matches!(err, BlobError::Config(_)));
    }

    #[test]
    fn local_store_writes_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = ObjectStoreBlobs::local(dir.path()).unwrap();
        store.put("prefix/data_1.tar", b"payload").unwrap();
        let on_disk = std::fs::read(dir.path().join("prefix/data_1.tar")).unwrap();
        assert_eq!(on_disk, b"payload");
        store.verify().unwrap();
    }
}
