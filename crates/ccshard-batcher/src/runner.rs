//! Scan the index, filter records, publish bounded batches

use std::io;
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use ccshard_core::record::encode_batch;
use ccshard_core::{
    CaptureRecord, QueueError, QueuePublisher, RangeDownloader, StreamError, fmt_num,
    shutdown_flag,
};
use indicatif::ProgressBar;

use crate::config::Config;
use crate::filter::{RecordError, check, parse_index_line};
use crate::index::IndexChunkRef;
use crate::metrics::BatcherMetrics;

/// Fatal batcher error; the run stops at the first one
#[derive(Debug)]
pub enum BatcherError {
    Config(String),
    /// Reading the cluster index failed
    Index(io::Error),
    Download {
        chunk: IndexChunkRef,
        source: StreamError,
    },
    /// Decompressed chunk is not UTF-8
    Encoding {
        chunk: IndexChunkRef,
        source: FromUtf8Error,
    },
    Record(RecordError),
    Serialize(serde_json::Error),
    Publish(QueueError),
}

impl std::fmt::Display for BatcherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid batcher config: {msg}"),
            Self::Index(e) => write!(f, "cluster index: {e}"),
            Self::Download { chunk, source } => write!(
                f,
                "download {} @{}+{}: {source}",
                chunk.filename, chunk.offset, chunk.length
            ),
            Self::Encoding { chunk, source } => write!(
                f,
                "chunk {} @{} is not UTF-8: {source}",
                chunk.filename, chunk.offset
            ),
            Self::Record(e) => write!(f, "{e}"),
            Self::Serialize(e) => write!(f, "serialize batch: {e}"),
            Self::Publish(e) => write!(f, "publish batch: {e}"),
        }
    }
}

impl std::error::Error for BatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Index(e) => Some(e),
            Self::Download { source, .. } => Some(source),
            Self::Encoding { source, .. } => Some(source),
            Self::Record(e) => Some(e),
            Self::Serialize(e) => Some(e),
            Self::Publish(e) => Some(e),
        }
    }
}

impl From<RecordError> for BatcherError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

/// Batcher run summary
#[derive(Debug, Default)]
pub struct RunSummary {
    pub chunks_scanned: usize,
    pub lines_scanned: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub batches_published: usize,
    pub records_published: usize,
    /// Sizes of the published batches, in order
    pub batch_sizes: Vec<usize>,
    /// Stopped because `max_batches` was reached
    pub early_stopped: bool,
    /// Stopped because shutdown was requested
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!("=== Batcher Summary ===");
        log::info!(
            "Chunks: {} | lines: {} | accepted: {} | rejected: {}",
            fmt_num(self.chunks_scanned),
            fmt_num(self.lines_scanned),
            fmt_num(self.accepted),
            fmt_num(self.rejected)
        );
        log::info!(
            "Published {} batches ({} records)",
            fmt_num(self.batches_published),
            fmt_num(self.records_published)
        );
        if self.early_stopped {
            log::info!("Stopped early at max_batches");
        }
        if self.interrupted {
            log::warn!("Interrupted before the end of the index");
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Scan every chunk of `index` and publish accepted records in batches.
///
/// Errors from the index, downloader or queue abort the run. The run ends
/// normally when the index is exhausted, when `max_batches` is reached
/// (without publishing the remaining partial batch) or when shutdown is
/// requested between chunks.
pub fn run<I, D, Q>(
    index: I,
    downloader: &D,
    queue: &Q,
    config: &Config,
    metrics: &BatcherMetrics,
    pb: &ProgressBar,
) -> Result<RunSummary, BatcherError>
where
    I: IntoIterator<Item = io::Result<IndexChunkRef>>,
    D: RangeDownloader + ?Sized,
    Q: QueuePublisher + ?Sized,
{
    run_until(index, downloader, queue, config, metrics, pb, shutdown_flag())
}

/// [`run`] with an explicit stop flag, checked before each chunk.
///
/// Once `stop` is set the scan ends with `interrupted = true` and the
/// partial batch is not published.
pub fn run_until<I, D, Q>(
    index: I,
    downloader: &D,
    queue: &Q,
    config: &Config,
    metrics: &BatcherMetrics,
    pb: &ProgressBar,
    stop: &AtomicBool,
) -> Result<RunSummary, BatcherError>
where
    I: IntoIterator<Item = io::Result<IndexChunkRef>>,
    D: RangeDownloader + ?Sized,
    Q: QueuePublisher + ?Sized,
{
    config.validate().map_err(BatcherError::Config)?;
    let start = Instant::now();
    let mut summary = RunSummary::default();
    let mut batch: Vec<CaptureRecord> = Vec::with_capacity(config.batch_size);

    'chunks: for chunk in index {
        if stop.load(Ordering::Relaxed) {
            log::warn!("Shutdown requested, stopping index scan");
            summary.interrupted = true;
            break;
        }
        let chunk = chunk.map_err(BatcherError::Index)?;
        let data = downloader
            .download_and_unzip(&chunk.filename, chunk.offset, chunk.length)
            .map_err(|source| BatcherError::Download {
                chunk: chunk.clone(),
                source,
            })?;
        let text = String::from_utf8(data).map_err(|source| BatcherError::Encoding {
            chunk: chunk.clone(),
            source,
        })?;
        summary.chunks_scanned += 1;
        metrics.chunks.inc();
        log::debug!(
            "{} @{}: {} bytes decompressed",
            chunk.filename,
            chunk.offset,
            text.len()
        );

        for line in text.split('\n').filter(|l| !l.is_empty()) {
            summary.lines_scanned += 1;
            let record = parse_index_line(line)?;
            let verdict = check(&record);
            if !verdict.is_accepted() {
                metrics.record_rejection(&verdict);
                summary.rejected += 1;
                continue;
            }
            summary.accepted += 1;
            batch.push(record);

            if batch.len() >= config.batch_size {
                publish(queue, &batch, metrics, &mut summary)?;
                batch.clear();
                if config
                    .max_batches
                    .is_some_and(|max| summary.batches_published >= max)
                {
                    log::info!("Early stopping");
                    summary.early_stopped = true;
                    break 'chunks;
                }
            }
        }

        pb.set_message(format!(
            "{} chunks, {} accepted, {} batches",
            fmt_num(summary.chunks_scanned),
            fmt_num(summary.accepted),
            fmt_num(summary.batches_published)
        ));
    }

    let under_cap = config
        .max_batches
        .map_or(true, |max| summary.batches_published < max);
    if !summary.early_stopped && !summary.interrupted && !batch.is_empty() && under_cap {
        publish(queue, &batch, metrics, &mut summary)?;
    }

    pb.finish_and_clear();
    summary.elapsed = start.elapsed();
    Ok(summary)
}

fn publish<Q: QueuePublisher + ?Sized>(
    queue: &Q,
    batch: &[CaptureRecord],
    metrics: &BatcherMetrics,
    summary: &mut RunSummary,
) -> Result<(), BatcherError> {
    let body = encode_batch(batch).map_err(BatcherError::Serialize)?;
    queue.publish(&body).map_err(BatcherError::Publish)?;
    metrics.batches.inc();
    summary.batches_published += 1;
    summary.records_published += batch.len();
    summary.batch_sizes.push(batch.len());
    log::info!("Published batch of {} records", batch.len());
    Ok(())
}
