//! `ccshard work` - consume batches and upload tokenized shards

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use prometheus::Registry;

use ccshard_core::{
    HttpRangeDownloader, MetricsServer, ObjectStoreBlobs, SharedProgress, SpoolQueue,
    TextfileOnDrop, fmt_bytes, fmt_num,
};
use ccshard_worker::{
    HfTokenizer, HtmlExtractor, RunSummary, ShardLimits, ShardWriter, Worker, WorkerMetrics,
};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct WorkArgs {
    /// Blob-store key prefix for uploaded shards
    #[arg(long = "s3-prefix", visible_alias = "prefix")]
    pub prefix: String,

    /// Maximum samples per shard
    #[arg(long, default_value_t = 1000)]
    pub max_samples_per_shard: usize,

    /// Maximum shard size in bytes (checked after each sample)
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub max_shard_size: u64,

    /// Retry failed shard uploads this many times before dropping them
    #[arg(long, default_value_t = 0)]
    pub upload_retries: u32,

    /// Exit once the spool is empty instead of waiting for more batches
    #[arg(long)]
    pub drain: bool,

    /// Spool directory (overrides config)
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,

    /// Tokenizer JSON file (overrides config)
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,
}

pub fn run(args: WorkArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let limits = ShardLimits {
        max_samples_per_shard: args.max_samples_per_shard,
        max_shard_size: args.max_shard_size,
        upload_retries: args.upload_retries,
    };
    limits
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid shard limits")?;

    let registry = Registry::new();
    let metrics = WorkerMetrics::new(&registry);
    // Declared before the writer so the dump sees the final flush
    let _dump = TextfileOnDrop::new(
        &registry,
        config.metrics.dump_dir.join("worker_metrics.txt"),
    );
    let _server = if config.metrics.enabled {
        let addr = config.metrics.addr(config.metrics.worker_port);
        Some(
            MetricsServer::start(addr, registry.clone())
                .with_context(|| format!("Failed to bind metrics on {addr}"))?,
        )
    } else {
        None
    };

    let store = match &config.store.local_dir {
        Some(dir) => ObjectStoreBlobs::local(dir),
        None => ObjectStoreBlobs::s3(&config.store.s3_settings()),
    }
    .context("Failed to configure blob store")?;
    store
        .verify()
        .with_context(|| format!("Blob store {} is not reachable", store.label()))?;

    let tokenizer_path = args
        .tokenizer
        .unwrap_or_else(|| config.tokenizer.path.clone());
    let tokenizer = HfTokenizer::from_file(
        &tokenizer_path,
        &config.tokenizer.name,
        &config.tokenizer.eos_token,
    )?;

    let spool_dir = args.spool_dir.unwrap_or_else(|| config.queue.spool_dir.clone());
    let queue = SpoolQueue::open(&spool_dir)
        .with_context(|| format!("Failed to open spool {}", spool_dir.display()))?;
    let requeued = queue
        .requeue_stale(Duration::from_secs(config.queue.requeue_after_secs))
        .context("Failed to requeue stale messages")?;
    if requeued > 0 {
        log::warn!("Requeued {requeued} abandoned batches");
    }
    let mut consumer = queue.consumer(
        Duration::from_millis(config.queue.poll_interval_ms),
        args.drain,
    );

    log::info!(
        "Consuming {} into {}/{} ({} samples or {} per shard)",
        spool_dir.display(),
        store.label(),
        args.prefix,
        limits.max_samples_per_shard,
        fmt_bytes(limits.max_shard_size)
    );

    let writer = ShardWriter::new(store.clone(), &args.prefix, limits, metrics.clone());
    let worker = Worker::new(
        HttpRangeDownloader::new(config.commoncrawl.base_url.clone()),
        HtmlExtractor::new(),
        tokenizer,
        writer,
        metrics.clone(),
        ccshard_worker::Config::default(),
    );

    let pb = progress.stage_line("work");
    let summary = ccshard_worker::run(worker, &mut consumer, &pb).context("Worker failed")?;
    summary.log();
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let c = &summary.consumed;
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Worker").fg(Color::Cyan),
            Cell::new("Count").fg(Color::Cyan),
        ]);
    table.add_row(vec!["Batches", &fmt_num(c.batches)]);
    table.add_row(vec!["Records", &fmt_num(c.records)]);
    table.add_row(vec!["Samples", &fmt_num(c.processed)]);
    table.add_row(vec!["Filtered (no_text)", &fmt_num(c.no_text)]);
    table.add_row(vec!["Filtered (invalid_length)", &fmt_num(c.invalid_length)]);
    let shards = c.shards_uploaded + usize::from(summary.final_shard.is_some());
    table.add_row(vec!["Shards uploaded", &fmt_num(shards)]);
    if c.failed_uploads > 0 {
        table.add_row(vec![
            Cell::new("Shards lost").fg(Color::Red),
            Cell::new(fmt_num(c.failed_uploads)).fg(Color::Red),
        ]);
    }
    eprintln!("\n{table}");
}
