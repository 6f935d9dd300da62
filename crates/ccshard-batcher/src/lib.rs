//! ccshard batcher - Common Crawl index to queued record batches
//!
//! Walks the chunks of a cluster index, keeps English pages fetched with
//! HTTP 200, and publishes them to the queue in fixed-size batches.
//!
//! # Example
//!
//! ```ignore
//! use ccshard_batcher::{BatcherMetrics, ClusterIndex, Config, run};
//!
//! let config = Config { batch_size: 50, max_batches: Some(10), ..Default::default() };
//! let index = ClusterIndex::open(&config.index_path)?;
//! let metrics = BatcherMetrics::new(&prometheus::Registry::new());
//! let summary = run(index, &downloader, &queue, &config, &metrics, &pb)?;
//! summary.log();
//! ```

pub mod config;
pub mod filter;
pub mod index;
pub mod metrics;
pub mod runner;

// Re-exports
pub use config::Config;
pub use filter::{FilterReason, RecordError, Verdict, check, parse_index_line};
pub use index::{ClusterIndex, IndexChunkRef, parse_cluster_line};
pub use metrics::BatcherMetrics;
pub use runner::{BatcherError, RunSummary, run, run_until};
