//! Worker run: consume loop with a guaranteed final flush

use std::time::{Duration, Instant};

use ccshard_core::{BlobStore, QueueConsumer, RangeDownloader, fmt_num};
use indicatif::ProgressBar;

use crate::extract::ContentExtractor;
use crate::shard_writer::{ShardError, UploadedShard};
use crate::tokenize::Tokenizer;
use crate::worker::{ConsumeSummary, Worker, WorkerError};

/// Worker run summary
#[derive(Debug, Default)]
pub struct RunSummary {
    pub consumed: ConsumeSummary,
    /// Partial shard uploaded by the final flush
    pub final_shard: Option<UploadedShard>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn log(&self) {
        let c = &self.consumed;
        log::info!("=== Worker Summary ===");
        log::info!(
            "Batches: {} | records: {} | samples: {}",
            fmt_num(c.batches),
            fmt_num(c.records),
            fmt_num(c.processed)
        );
        log::info!(
            "Filtered: {} no_text, {} invalid_length",
            fmt_num(c.no_text),
            fmt_num(c.invalid_length)
        );
        let shards = c.shards_uploaded + usize::from(self.final_shard.is_some());
        log::info!("Shards uploaded: {}", fmt_num(shards));
        if c.failed_uploads > 0 {
            log::warn!("Shards lost to failed uploads: {}", fmt_num(c.failed_uploads));
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Drive `worker` over `consumer`, then flush its last partial shard.
///
/// The flush runs whether the loop ended normally or with an error; a loop
/// error takes precedence over a flush error in the result.
pub fn run<C, D, E, T, B>(
    mut worker: Worker<D, E, T, B>,
    consumer: &mut C,
    pb: &ProgressBar,
) -> Result<RunSummary, WorkerError>
where
    C: QueueConsumer + ?Sized,
    D: RangeDownloader,
    E: ContentExtractor,
    T: Tokenizer,
    B: BlobStore,
{
    let start = Instant::now();
    let consumed = worker.consume(consumer, pb);
    if consumed.is_err() {
        log::warn!("Consume loop failed, flushing pending samples");
    }

    let flushed = match worker.flush() {
        Ok(shard) => Ok(shard),
        // Already logged by the writer; the samples are gone
        Err(ShardError::Upload(_)) => Ok(None),
        Err(ShardError::Archive(e)) => Err(WorkerError::Shard(e)),
    };
    pb.finish_and_clear();

    let consumed = consumed?;
    Ok(RunSummary {
        consumed,
        final_shard: flushed?,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use ccshard_core::record::encode_batch;
    use ccshard_core::{
        CaptureRecord, MemoryQueue, ObjectStoreBlobs, QueuePublisher, StreamError,
    };
    use prometheus::Registry;
    use serde_json::json;

    use crate::config::Config;
    use crate::extract::HtmlExtractor;
    use crate::metrics::WorkerMetrics;
    use crate::shard_writer::{ShardLimits, ShardWriter};
    use crate::tokenize::TokenizeError;
    use crate::warc::tests::{http_response, warc_record};

    struct OnePage;

    impl RangeDownloader for OnePage {
        fn download_and_unzip(&self, _: &str, offset: u64, _: u64) -> Result<Vec<u8>, StreamError> {
            if offset == 0 {
                return Err(StreamError::Http {
                    status: Some(503),
                    message: "unavailable".to_string(),
                });
            }
            let body = format!("<body><p>{}</p></body>", "lorem ipsum ".repeat(60));
            Ok(warc_record("response", &http_response(&body)))
        }
    }

    struct Bytes;

    impl Tokenizer for Bytes {
        fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizeError> {
            Ok(text.bytes().map(u32::from).collect())
        }
        fn name(&self) -> &str {
            "bytes"
        }
        fn eos_id(&self) -> Option<u32> {
            Some(0)
        }
    }

    fn batch(offsets: &[u64]) -> Vec<u8> {
        let records: Vec<CaptureRecord> = offsets
            .iter()
            .map(|o| CaptureRecord {
                surt_url: format!("org,example)/{o}"),
                timestamp: "20240101000000".to_string(),
                metadata: json!({"filename": "w.warc.gz", "offset": o, "length": 10})
                    .as_object()
                    .unwrap()
                    .clone(),
            })
            .collect();
        encode_batch(&records).unwrap()
    }

    fn worker(
        store: &ObjectStoreBlobs,
        metrics: &WorkerMetrics,
    ) -> Worker<OnePage, HtmlExtractor, Bytes, ObjectStoreBlobs> {
        let limits = ShardLimits {
            max_samples_per_shard: 2,
            ..Default::default()
        };
        Worker::new(
            OnePage,
            HtmlExtractor::new(),
            Bytes,
            ShardWriter::new(store.clone(), "run", limits, metrics.clone()),
            metrics.clone(),
            Config::default(),
        )
    }

    #[test]
    fn flushes_partial_shard_at_end() {
        let store = ObjectStoreBlobs::in_memory();
        let metrics = WorkerMetrics::new(&Registry::new());
        let queue = MemoryQueue::new();
        queue.publish(&batch(&[1, 2, 3])).unwrap();

        let summary = run(
            worker(&store, &metrics),
            &mut queue.consumer(),
            &ProgressBar::hidden(),
        )
        .unwrap();

        assert_eq!(summary.consumed.processed, 3);
        assert_eq!(summary.consumed.shards_uploaded, 1);
        assert_eq!(summary.final_shard.as_ref().unwrap().samples, 1);
        assert_eq!(store.list("run").unwrap().len(), 2);
        assert_eq!(metrics.shards_uploaded.get(), 2);
    }

    #[test]
    fn flushes_even_when_the_loop_fails() {
        let store = ObjectStoreBlobs::in_memory();
        let metrics = WorkerMetrics::new(&Registry::new());
        let queue = MemoryQueue::new();
        // Offset 0 fails to download after one sample was added
        queue.publish(&batch(&[5, 0])).unwrap();

        let err = run(
            worker(&store, &metrics),
            &mut queue.consumer(),
            &ProgressBar::hidden(),
        )
        .unwrap_err();

        assert!(matches!(err, WorkerError::Download { .. }));
        assert_eq!(queue.acked(), 0);
        assert_eq!(store.list("run").unwrap().len(), 1);
    }
}
