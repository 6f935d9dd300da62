//! ccshard - Common Crawl to tokenized training shards
//!
//! `batch` scans a cluster index and publishes batches of capture records,
//! `work` consumes them and uploads tar shards of token arrays.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "ccshard")]
#[command(about = "Turn Common Crawl captures into tokenized training shards")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./ccshard.toml or ~/.config/ccshard/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for transient download failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a cluster index and publish batches of accepted records
    Batch(cmd::batch::BatchArgs),
    /// Consume batches, tokenize documents and upload shards
    Work(cmd::work::WorkArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(ccshard_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    ccshard_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    // Apply HTTP settings (config file defaults, CLI overrides)
    let http_config = ccshard_core::HttpConfig {
        read_timeout: std::time::Duration::from_secs(
            cli.read_timeout.unwrap_or(config.http.read_timeout),
        ),
        max_retries: cli.max_retries.unwrap_or(config.http.max_retries),
    };
    ccshard_core::set_http_config(http_config);

    ccshard_core::install_signal_handlers().context("Failed to install signal handlers")?;

    let result = match cli.command {
        Command::Batch(args) => cmd::batch::run(args, &config, &progress),
        Command::Work(args) => cmd::work::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["CC base URL", &config.commoncrawl.base_url]);
            table.add_row(vec!["CC index URL", &config.commoncrawl.index_url()]);
            table.add_row(vec![
                "Spool directory",
                &config.queue.spool_dir.display().to_string(),
            ]);
            let store = match &config.store.local_dir {
                Some(dir) => dir.display().to_string(),
                None => format!(
                    "s3://{} ({})",
                    config.store.bucket,
                    config.store.endpoint.as_deref().unwrap_or("AWS")
                ),
            };
            table.add_row(vec!["Blob store", &store]);
            table.add_row(vec![
                "S3 credentials",
                if config.store.access_key.is_some() && config.store.secret_key.is_some() {
                    "configured"
                } else {
                    "not set"
                },
            ]);
            table.add_row(vec![
                "Tokenizer",
                &format!(
                    "{} ({})",
                    config.tokenizer.name,
                    config.tokenizer.path.display()
                ),
            ]);
            table.add_row(vec![
                "Metrics",
                &if config.metrics.enabled {
                    format!(
                        "{} / {}",
                        config.metrics.addr(config.metrics.batcher_port),
                        config.metrics.addr(config.metrics.worker_port)
                    )
                } else {
                    "disabled".to_string()
                },
            ]);
            table.add_row(vec![
                "Metrics dump",
                &config.metrics.dump_dir.display().to_string(),
            ]);
            table.add_row(vec![
                "Read timeout",
                &format!("{}s", config.http.read_timeout),
            ]);
            table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);

            eprintln!("\n{table}");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}
