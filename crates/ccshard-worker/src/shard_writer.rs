//! In-memory tar shards with size/count rotation to the blob store
//!
//! Each sample becomes two entries, `{id}.tokens.npy` and `{id}.meta.json`,
//! where `id` is a random UUIDv4 in simple hex form. A shard is uploaded as
//! `{prefix}/data_{uuid}.tar` once it reaches either limit, so concurrent
//! workers can share a prefix without coordination.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ccshard_core::retry::{backoff_duration, retry_with_schedule};
use ccshard_core::{BlobStore, UploadError};
use tar::{Builder, EntryType, Header};
use uuid::Uuid;

use crate::metrics::WorkerMetrics;
use crate::sample::Sample;

/// Rotation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardLimits {
    pub max_samples_per_shard: usize,
    /// Soft bound: checked after each sample, so a shard may exceed it by
    /// one sample
    pub max_shard_size: u64,
    /// Extra upload attempts for retryable blob errors (0 = log and drop)
    pub upload_retries: u32,
}

impl Default for ShardLimits {
    fn default() -> Self {
        Self {
            max_samples_per_shard: 1000,
            max_shard_size: 100 * 1024 * 1024,
            upload_retries: 0,
        }
    }
}

impl ShardLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_samples_per_shard == 0 {
            return Err("max_samples_per_shard must be positive".to_string());
        }
        if self.max_shard_size == 0 {
            return Err("max_shard_size must be positive".to_string());
        }
        Ok(())
    }
}

/// A shard that reached the blob store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedShard {
    pub key: String,
    pub samples: usize,
    pub bytes: usize,
}

/// Shard writer failure
#[derive(Debug)]
pub enum ShardError {
    /// Building the archive failed; the writer state is unreliable
    Archive(io::Error),
    /// Upload failed; the shard was dropped from the writer but travels
    /// with the error
    Upload(UploadError),
}

impl std::fmt::Display for ShardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive(e) => write!(f, "shard archive: {e}"),
            Self::Upload(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ShardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Archive(e) => Some(e),
            Self::Upload(e) => Some(e),
        }
    }
}

impl From<io::Error> for ShardError {
    fn from(e: io::Error) -> Self {
        Self::Archive(e)
    }
}

/// Accumulates samples into a tar archive and rotates it to `store`.
///
/// Rotation is synchronous and inline with [`ShardWriter::add_sample`].
/// Pending samples are uploaded by [`ShardWriter::flush`], or on drop if
/// the owner never got to call it.
pub struct ShardWriter<B: BlobStore> {
    store: B,
    prefix: String,
    limits: ShardLimits,
    metrics: WorkerMetrics,
    builder: Builder<Vec<u8>>,
    samples: usize,
    schedule: fn(u32) -> Duration,
}

impl<B: BlobStore> ShardWriter<B> {
    pub fn new(store: B, prefix: &str, limits: ShardLimits, metrics: WorkerMetrics) -> Self {
        Self {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
            limits,
            metrics,
            builder: Builder::new(Vec::new()),
            samples: 0,
            schedule: backoff_duration,
        }
    }

    /// Replace the sleep schedule used between upload retries.
    pub fn with_retry_schedule(mut self, schedule: fn(u32) -> Duration) -> Self {
        self.schedule = schedule;
        self
    }

    /// Samples in the open shard
    pub fn pending_samples(&self) -> usize {
        self.samples
    }

    /// Archive bytes written so far for the open shard (no trailer)
    pub fn pending_bytes(&self) -> u64 {
        self.builder.get_ref().len() as u64
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Key prefix without a trailing `/`
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn limits(&self) -> &ShardLimits {
        &self.limits
    }

    /// Append a sample; rotates when a limit is reached.
    ///
    /// Returns the uploaded shard when this call rotated.
    pub fn add_sample(&mut self, sample: &Sample) -> Result<Option<UploadedShard>, ShardError> {
        let id = Uuid::new_v4().simple().to_string();
        let mtime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.append(&format!("{id}.tokens.npy"), &sample.tokens, mtime)?;
        self.append(&format!("{id}.meta.json"), &sample.meta, mtime)?;
        self.samples += 1;

        if self.pending_bytes() >= self.limits.max_shard_size
            || self.samples >= self.limits.max_samples_per_shard
        {
            return self.rotate().map(Some);
        }
        Ok(None)
    }

    fn append(&mut self, name: &str, data: &[u8], mtime: u64) -> io::Result<()> {
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        self.builder.append_data(&mut header, name, data)
    }

    /// Finish the open shard, upload it, and start a fresh one.
    ///
    /// The writer is reset whatever the upload outcome; a failed upload
    /// hands the shard back inside [`ShardError::Upload`].
    pub fn rotate(&mut self) -> Result<UploadedShard, ShardError> {
        let samples = std::mem::take(&mut self.samples);
        let builder = std::mem::replace(&mut self.builder, Builder::new(Vec::new()));
        let shard = builder.into_inner()?;
        let key = self.shard_key();

        let label = format!("upload {key}");
        let result = retry_with_schedule(&label, self.limits.upload_retries, self.schedule, || {
            self.store.put(&key, &shard)
        });
        match result {
            Ok(()) => {
                log::info!("Uploaded {key} ({samples} samples, {} bytes)", shard.len());
                self.metrics.shards_uploaded.inc();
                Ok(UploadedShard {
                    key,
                    samples,
                    bytes: shard.len(),
                })
            }
            Err(source) => {
                log::error!("Failed to upload {key}: {source}");
                self.metrics.shard_upload_failures.inc();
                Err(ShardError::Upload(UploadError {
                    key,
                    samples,
                    shard,
                    source,
                }))
            }
        }
    }

    /// Upload the final partial shard, if any samples are pending.
    pub fn flush(&mut self) -> Result<Option<UploadedShard>, ShardError> {
        if self.samples == 0 {
            // Nothing but possibly an empty archive; start over silently
            self.builder = Builder::new(Vec::new());
            return Ok(None);
        }
        self.rotate().map(Some)
    }

    fn shard_key(&self) -> String {
        let name = format!("data_{}.tar", Uuid::new_v4().simple());
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{name}", self.prefix)
        }
    }
}

impl<B: BlobStore> Drop for ShardWriter<B> {
    fn drop(&mut self) {
        if self.samples > 0 {
            log::warn!("Shard writer dropped with {} pending samples, flushing", self.samples);
            if let Err(e) = self.flush() {
                log::error!("Final flush failed: {e}");
            }
        }
    }
}
