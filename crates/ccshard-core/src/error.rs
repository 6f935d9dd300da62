//! Upload failure type shared by shard producers

use crate::blob::{BlobError, BlobStore};
use crate::retry::Retryable;

/// A finished shard that could not be stored.
///
/// The writer has already moved on to a fresh archive when this is returned.
/// The shard bytes travel with the error so a caller can retry the upload
/// later; dropping the error drops the shard.
#[derive(Debug)]
pub struct UploadError {
    pub key: String,
    pub samples: usize,
    pub shard: Vec<u8>,
    pub source: BlobError,
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "upload of {} ({} samples, {} bytes) failed: {}",
            self.key,
            self.samples,
            self.shard.len(),
            self.source
        )
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Retryable for UploadError {
    fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

impl UploadError {
    /// Try the same upload again against `store`.
    pub fn retry(&self, store: &dyn BlobStore) -> Result<(), BlobError> {
        store.put(&self.key, &self.shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::ObjectStoreBlobs;

    fn transient() -> BlobError {
        BlobError::Store(object_store::Error::Generic {
            store: "test",
            source: "503 slow down".into(),
        })
    }

    #[test]
    fn display_names_key_and_sizes() {
        let err = UploadError {
            key: "out/data_ab.tar".to_string(),
            samples: 3,
            shard: vec![0; 1024],
            source: transient(),
        };
        let msg = err.to_string();
        assert!(msg.contains("out/data_ab.tar"));
        assert!(msg.contains("3 samples"));
        assert!(msg.contains("1024 bytes"));
    }

    #[test]
    fn retryability_follows_source() {
        let err = UploadError {
            key: "k".to_string(),
            samples: 1,
            shard: vec![],
            source: transient(),
        };
        assert!(err.is_retryable());

        let err = UploadError {
            source: BlobError::Config("bad".into()),
            ..err
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn retry_stores_carried_shard() {
        let store = ObjectStoreBlobs::in_memory();
        let err = UploadError {
            key: "p/data_1.tar".to_string(),
            samples: 1,
            shard: b"tar bytes".to_vec(),
            source: transient(),
        };
        err.retry(&store).unwrap();
        assert_eq!(store.get("p/data_1.tar").unwrap(), b"tar bytes");
    }
}
