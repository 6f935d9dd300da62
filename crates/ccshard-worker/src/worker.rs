//! Batch processing and the blocking consume loop

use std::io;

use ccshard_core::record::{LocationError, decode_batch};
use ccshard_core::{
    BlobStore, QueueConsumer, QueueError, RangeDownloader, RecordLocation, StreamError, fmt_num,
};
use indicatif::ProgressBar;

use crate::config::Config;
use crate::extract::ContentExtractor;
use crate::metrics::{INVALID_LENGTH, NO_TEXT, WorkerMetrics};
use crate::sample::build_sample;
use crate::shard_writer::{ShardError, ShardWriter, UploadedShard};
use crate::tokenize::{TokenizeError, Tokenizer};
use crate::warc::{WarcError, first_response};

/// Fatal worker error; the current message stays unacknowledged
#[derive(Debug)]
pub enum WorkerError {
    Config(String),
    Queue(QueueError),
    /// Message body is not a JSON batch
    Batch(serde_json::Error),
    Location(LocationError),
    Download {
        location: RecordLocation,
        source: StreamError,
    },
    Warc {
        location: RecordLocation,
        source: WarcError,
    },
    Tokenize(TokenizeError),
    /// Encoding sample payloads failed
    Sample(io::Error),
    /// Building the shard archive failed
    Shard(io::Error),
}

impl std::fmt::Display for WorkerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid worker config: {msg}"),
            Self::Queue(e) => write!(f, "{e}"),
            Self::Batch(e) => write!(f, "malformed batch: {e}"),
            Self::Location(e) => write!(f, "{e}"),
            Self::Download { location, source } => write!(
                f,
                "download {} @{}+{}: {source}",
                location.filename, location.offset, location.length
            ),
            Self::Warc { location, source } => {
                write!(f, "{} @{}: {source}", location.filename, location.offset)
            }
            Self::Tokenize(e) => write!(f, "{e}"),
            Self::Sample(e) => write!(f, "encode sample: {e}"),
            Self::Shard(e) => write!(f, "shard archive: {e}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Queue(e) => Some(e),
            Self::Batch(e) => Some(e),
            Self::Location(e) => Some(e),
            Self::Download { source, .. } => Some(source),
            Self::Warc { source, .. } => Some(source),
            Self::Tokenize(e) => Some(e),
            Self::Sample(e) | Self::Shard(e) => Some(e),
        }
    }
}

impl From<QueueError> for WorkerError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

/// What happened to the records of one batch
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub records: usize,
    pub processed: usize,
    pub no_text: usize,
    pub invalid_length: usize,
    /// Shards rotated while processing this batch
    pub shards: Vec<UploadedShard>,
    /// Rotations whose upload failed (samples lost)
    pub failed_uploads: usize,
}

/// Totals over a consume loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub batches: usize,
    pub records: usize,
    pub processed: usize,
    pub no_text: usize,
    pub invalid_length: usize,
    pub shards_uploaded: usize,
    pub failed_uploads: usize,
}

impl ConsumeSummary {
    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.batches += 1;
        self.records += outcome.records;
        self.processed += outcome.processed;
        self.no_text += outcome.no_text;
        self.invalid_length += outcome.invalid_length;
        self.shards_uploaded += outcome.shards.len();
        self.failed_uploads += outcome.failed_uploads;
    }
}

/// Turns batches into samples on one shard writer.
pub struct Worker<D, E, T, B: BlobStore> {
    downloader: D,
    extractor: E,
    tokenizer: T,
    writer: ShardWriter<B>,
    metrics: WorkerMetrics,
    config: Config,
}

impl<D, E, T, B> Worker<D, E, T, B>
where
    D: RangeDownloader,
    E: ContentExtractor,
    T: Tokenizer,
    B: BlobStore,
{
    pub fn new(
        downloader: D,
        extractor: E,
        tokenizer: T,
        writer: ShardWriter<B>,
        metrics: WorkerMetrics,
        config: Config,
    ) -> Self {
        Self {
            downloader,
            extractor,
            tokenizer,
            writer,
            metrics,
            config,
        }
    }

    pub fn writer(&self) -> &ShardWriter<B> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ShardWriter<B> {
        &mut self.writer
    }

    /// Process every record of a batch message body.
    ///
    /// Per-record rejections (`no_text`, `invalid_length`) are tallied and
    /// skipped. A failed shard upload is logged and the shard dropped.
    /// Anything else is fatal for the batch.
    pub fn process_batch(&mut self, body: &[u8]) -> Result<BatchOutcome, WorkerError> {
        let batch = decode_batch(body).map_err(WorkerError::Batch)?;
        let mut outcome = BatchOutcome {
            records: batch.len(),
            ..Default::default()
        };

        for record in &batch {
            let location = record.location().map_err(WorkerError::Location)?;
            let data = self
                .downloader
                .download_and_unzip(&location.filename, location.offset, location.length)
                .map_err(|source| WorkerError::Download {
                    location: location.clone(),
                    source,
                })?;
            let response = first_response(&data).map_err(|source| WorkerError::Warc {
                location: location.clone(),
                source,
            })?;

            let text = response
                .and_then(|r| self.extractor.extract(r.http_body()))
                .filter(|t| !t.trim().is_empty());
            let Some(text) = text else {
                self.metrics.filter(NO_TEXT);
                outcome.no_text += 1;
                continue;
            };
            if !self.config.accepts_length(text.chars().count()) {
                self.metrics.filter(INVALID_LENGTH);
                outcome.invalid_length += 1;
                continue;
            }

            let ids = self
                .tokenizer
                .encode(text.trim())
                .map_err(WorkerError::Tokenize)?;
            let sample =
                build_sample(&ids, &self.tokenizer, &location).map_err(WorkerError::Sample)?;
            match self.writer.add_sample(&sample) {
                Ok(Some(shard)) => outcome.shards.push(shard),
                Ok(None) => {}
                Err(ShardError::Upload(e)) => {
                    log::warn!("Dropped {} samples of shard {}", e.samples, e.key);
                    outcome.failed_uploads += 1;
                }
                Err(ShardError::Archive(e)) => return Err(WorkerError::Shard(e)),
            }
            self.metrics.processed_docs.inc();
            outcome.processed += 1;
        }
        Ok(outcome)
    }

    /// Receive, process and acknowledge batches until the consumer ends.
    ///
    /// One delivery is outstanding at a time; it is acknowledged only after
    /// its whole batch is processed. A fatal error returns with the delivery
    /// unacknowledged so the queue redelivers it.
    pub fn consume<C: QueueConsumer + ?Sized>(
        &mut self,
        consumer: &mut C,
        pb: &ProgressBar,
    ) -> Result<ConsumeSummary, WorkerError> {
        self.config.validate().map_err(WorkerError::Config)?;
        self.writer
            .limits()
            .validate()
            .map_err(WorkerError::Config)?;
        let mut summary = ConsumeSummary::default();
        while let Some(delivery) = consumer.receive()? {
            log::info!("Received batch of {} bytes", delivery.body.len());
            let outcome = self.process_batch(&delivery.body)?;
            self.metrics.batches.inc();
            consumer.ack(delivery)?;

            log::debug!(
                "Batch done: {} records, {} processed, {} no_text, {} invalid_length",
                outcome.records,
                outcome.processed,
                outcome.no_text,
                outcome.invalid_length
            );
            summary.absorb(&outcome);
            pb.set_message(format!(
                "{} batches, {} samples, {} shards",
                fmt_num(summary.batches),
                fmt_num(summary.processed),
                fmt_num(summary.shards_uploaded)
            ));
        }
        Ok(summary)
    }

    /// Upload the final partial shard.
    pub fn flush(&mut self) -> Result<Option<UploadedShard>, ShardError> {
        self.writer.flush()
    }
}
