//! `ccshard batch` - scan a cluster index and publish record batches

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use prometheus::Registry;

use ccshard_batcher::{BatcherMetrics, ClusterIndex, RunSummary};
use ccshard_core::{
    HttpRangeDownloader, MetricsServer, SharedProgress, SpoolQueue, TextfileOnDrop, fmt_num,
};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Cluster index file (cluster.idx, optionally gzipped)
    #[arg(long = "cluster-idx-filename", visible_alias = "index")]
    pub index: PathBuf,

    /// Records per batch
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    /// Stop after publishing this many batches
    #[arg(long)]
    pub max_batches: Option<usize>,

    /// Spool directory (overrides config)
    #[arg(long)]
    pub spool_dir: Option<PathBuf>,
}

pub fn run(args: BatchArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let batcher_config = ccshard_batcher::Config {
        index_path: args.index,
        batch_size: args.batch_size,
        max_batches: args.max_batches,
    };
    batcher_config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Invalid batcher arguments")?;

    let registry = Registry::new();
    let metrics = BatcherMetrics::new(&registry);
    let _dump = TextfileOnDrop::new(
        &registry,
        config.metrics.dump_dir.join("batcher_metrics.txt"),
    );
    let _server = if config.metrics.enabled {
        let addr = config.metrics.addr(config.metrics.batcher_port);
        Some(
            MetricsServer::start(addr, registry.clone())
                .with_context(|| format!("Failed to bind metrics on {addr}"))?,
        )
    } else {
        None
    };

    let spool_dir = args.spool_dir.unwrap_or_else(|| config.queue.spool_dir.clone());
    let queue = SpoolQueue::open(&spool_dir)
        .with_context(|| format!("Failed to open spool {}", spool_dir.display()))?;
    let index = ClusterIndex::open(&batcher_config.index_path).with_context(|| {
        format!("Failed to open index {}", batcher_config.index_path.display())
    })?;
    let downloader = HttpRangeDownloader::new(config.commoncrawl.index_url());

    log::info!(
        "Batching {} into {} (batch size {}, max batches {})",
        batcher_config.index_path.display(),
        spool_dir.display(),
        batcher_config.batch_size,
        batcher_config
            .max_batches
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    let pb = progress.stage_line("batch");
    let summary = ccshard_batcher::run(index, &downloader, &queue, &batcher_config, &metrics, &pb)
        .context("Batcher failed")?;
    summary.log();
    print_summary(&summary, &metrics);
    Ok(())
}

fn print_summary(summary: &RunSummary, metrics: &BatcherMetrics) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Batcher").fg(Color::Cyan),
            Cell::new("Count").fg(Color::Cyan),
        ]);
    table.add_row(vec!["Index chunks".to_string(), fmt_num(summary.chunks_scanned)]);
    table.add_row(vec!["Records scanned".to_string(), fmt_num(summary.lines_scanned)]);
    table.add_row(vec!["Accepted".to_string(), fmt_num(summary.accepted)]);
    table.add_row(vec!["Rejected".to_string(), fmt_num(summary.rejected)]);
    for reason in ["language", "status"] {
        table.add_row(vec![
            format!("  failed {reason}"),
            fmt_num(metrics.filtered(reason) as usize),
        ]);
    }
    table.add_row(vec![
        "Batches published".to_string(),
        fmt_num(summary.batches_published),
    ]);
    table.add_row(vec![
        "Records published".to_string(),
        fmt_num(summary.records_published),
    ]);
    eprintln!("\n{table}");
}
