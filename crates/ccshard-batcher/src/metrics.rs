//! Batcher counters, registered on a registry owned by the caller

use ccshard_core::metrics::{register_counter, register_counter_vec};
use prometheus::{IntCounter, IntCounterVec, Registry};

use crate::filter::Verdict;

/// Counters updated by [`crate::run`].
#[derive(Clone)]
pub struct BatcherMetrics {
    registry: Registry,
    pub batches: IntCounter,
    pub filtered_docs: IntCounterVec,
    pub rejected_docs: IntCounter,
    pub chunks: IntCounter,
}

impl BatcherMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            registry: registry.clone(),
            batches: register_counter(registry, "batcher_batches_total", "Batches published"),
            filtered_docs: register_counter_vec(
                registry,
                "batcher_filtered_docs_total",
                "Records failing a filter condition",
                &["reason"],
            ),
            rejected_docs: register_counter(
                registry,
                "batcher_rejected_docs_total",
                "Records rejected by the filter",
            ),
            chunks: register_counter(
                registry,
                "batcher_index_chunks_total",
                "Index chunks downloaded and scanned",
            ),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Tally a rejected record once overall and once per failing condition.
    pub fn record_rejection(&self, verdict: &Verdict) {
        self.rejected_docs.inc();
        for reason in verdict.reasons() {
            self.filtered_docs.with_label_values(&[reason.label()]).inc();
        }
    }

    pub fn filtered(&self, label: &str) -> u64 {
        self.filtered_docs.with_label_values(&[label]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccshard_core::metrics::encode_text;

    #[test]
    fn rejection_counts_each_reason() {
        let metrics = BatcherMetrics::new(&Registry::new());
        metrics.record_rejection(&Verdict {
            language_ok: false,
            status_ok: false,
        });
        metrics.record_rejection(&Verdict {
            language_ok: true,
            status_ok: false,
        });
        assert_eq!(metrics.rejected_docs.get(), 2);
        assert_eq!(metrics.filtered("language"), 1);
        assert_eq!(metrics.filtered("status"), 2);

        let text = encode_text(metrics.registry());
        assert!(text.contains("batcher_filtered_docs_total{reason=\"status\"} 2"));
    }
}
