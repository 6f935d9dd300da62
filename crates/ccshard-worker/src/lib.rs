//! ccshard worker - queued batches to tokenized tar shards
//!
//! Consumes record batches one at a time, fetches each record's WARC range,
//! extracts and tokenizes the page text, and packs the samples into tar
//! shards uploaded to a blob store.
//!
//! # Example
//!
//! ```ignore
//! use ccshard_worker::{Config, HtmlExtractor, ShardLimits, ShardWriter, Worker, WorkerMetrics};
//!
//! let metrics = WorkerMetrics::new(&prometheus::Registry::new());
//! let writer = ShardWriter::new(store, "shards/gpt2", ShardLimits::default(), metrics.clone());
//! let worker = Worker::new(downloader, HtmlExtractor::new(), tokenizer, writer, metrics, Config::default());
//! let summary = ccshard_worker::run(worker, &mut consumer, &pb)?;
//! summary.log();
//! ```

pub mod config;
pub mod extract;
pub mod metrics;
pub mod runner;
pub mod sample;
pub mod shard_writer;
pub mod tokenize;
pub mod warc;
pub mod worker;

// Re-exports
pub use config::Config;
pub use extract::{ContentExtractor, HtmlExtractor};
pub use metrics::WorkerMetrics;
pub use runner::{RunSummary, run};
pub use sample::{Sample, build_sample, encode_tokens};
pub use shard_writer::{ShardError, ShardLimits, ShardWriter, UploadedShard};
pub use tokenize::{HfTokenizer, TokenizeError, Tokenizer};
pub use warc::{WarcError, WarcReader, WarcRecord, first_response};
pub use worker::{BatchOutcome, ConsumeSummary, Worker, WorkerError};
