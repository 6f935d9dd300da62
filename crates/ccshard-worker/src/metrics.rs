//! Worker counters, registered on a registry owned by the caller

use ccshard_core::metrics::{register_counter, register_counter_vec};
use prometheus::{IntCounter, IntCounterVec, Registry};

/// Per-document rejection reasons
pub const NO_TEXT: &str = "no_text";
pub const INVALID_LENGTH: &str = "invalid_length";

/// Counters shared by the consume loop and the shard writer.
///
/// Cloning is cheap and clones update the same series.
#[derive(Clone)]
pub struct WorkerMetrics {
    registry: Registry,
    pub batches: IntCounter,
    pub filtered_docs: IntCounterVec,
    pub processed_docs: IntCounter,
    pub shards_uploaded: IntCounter,
    pub shard_upload_failures: IntCounter,
}

impl WorkerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            batches: register_counter(registry, "worker_batches_total", "Batches consumed"),
            filtered_docs: register_counter_vec(
                registry,
                "worker_filtered_docs_total",
                "Documents skipped, by reason",
                &["reason"],
            ),
            processed_docs: register_counter(
                registry,
                "worker_processed_docs_total",
                "Documents tokenized into samples",
            ),
            shards_uploaded: register_counter(
                registry,
                "worker_shards_uploaded_total",
                "Shards stored in the blob store",
            ),
            shard_upload_failures: register_counter(
                registry,
                "worker_shard_upload_failures_total",
                "Shards dropped after a failed upload",
            ),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn filter(&self, reason: &str) {
        self.filtered_docs.with_label_values(&[reason]).inc();
    }

    pub fn filtered(&self, reason: &str) -> u64 {
        self.filtered_docs.with_label_values(&[reason]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccshard_core::metrics::encode_text;

    #[test]
    fn clones_share_series() {
        let metrics = WorkerMetrics::new(&Registry::new());
        let writer_side = metrics.clone();
        metrics.filter(NO_TEXT);
        writer_side.filter(NO_TEXT);
        writer_side.filter(INVALID_LENGTH);
        writer_side.shards_uploaded.inc();

        assert_eq!(metrics.filtered(NO_TEXT), 2);
        assert_eq!(metrics.filtered(INVALID_LENGTH), 1);
        assert_eq!(metrics.shards_uploaded.get(), 1);

        let text = encode_text(metrics.registry());
        assert!(text.contains("worker_filtered_docs_total{reason=\"no_text\"} 2"));
        assert!(text.contains("worker_shards_uploaded_total 1"));
    }
}
