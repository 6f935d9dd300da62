//! ccshard core - shared infrastructure for the shard pipelines
//!
//! Capture-record wire type, HTTP range downloads, queue and blob-store
//! contracts with their local bindings, metrics exposition, logging and
//! progress helpers used by both the batcher and the worker.

pub mod blob;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod record;
pub mod retry;
pub mod shutdown;
pub mod stream;

// Re-exports for convenience
pub use blob::{BlobError, BlobStore, ObjectStoreBlobs, S3Settings};
pub use error::UploadError;
pub use logging::{IndicatifLogger, init_logging};
pub use metrics::{MetricsServer, TextfileOnDrop, write_to_textfile};
pub use progress::{ProgressContext, SharedProgress, fmt_bytes, fmt_num};
pub use queue::{
    Delivery, MemoryQueue, QueueConsumer, QueueError, QueuePublisher, SpoolQueue,
};
pub use record::{CaptureRecord, RecordLocation};
pub use retry::{Retryable, retry_with_backoff};
pub use shutdown::{install_signal_handlers, shutdown_flag};
pub use stream::{
    HttpConfig, HttpRangeDownloader, RangeDownloader, SHARED_RUNTIME, StreamError, http_client,
    http_config, set_http_config,
};
