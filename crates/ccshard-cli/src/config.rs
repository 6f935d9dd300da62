//! Configuration loading from TOML files

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for ccshard
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub http: HttpSettings,
    pub commoncrawl: CommonCrawlConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub tokenizer: TokenizerConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Seconds to wait for a range body
    pub read_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            read_timeout: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommonCrawlConfig {
    pub base_url: String,
    /// Crawl collection holding `indexes/cdx-*.gz`
    pub crawl_path: String,
}

impl Default for CommonCrawlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.commoncrawl.org".to_string(),
            crawl_path: "cc-index/collections/CC-MAIN-2024-30".to_string(),
        }
    }
}

impl CommonCrawlConfig {
    /// Base URL for CDX chunk downloads
    pub fn index_url(&self) -> String {
        format!(
            "{}/{}/indexes",
            self.base_url.trim_end_matches('/'),
            self.crawl_path.trim_matches('/')
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Spool directory shared by batchers and workers
    pub spool_dir: PathBuf,
    pub poll_interval_ms: u64,
    /// Claimed messages older than this are redelivered at worker startup
    pub requeue_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("./spool"),
            poll_interval_ms: 1000,
            requeue_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(deserialize_with = "deserialize_env_var")]
    pub endpoint: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub access_key: Option<String>,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub secret_key: Option<String>,
    pub bucket: String,
    pub region: String,
    /// Write shards to this directory instead of S3
    pub local_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(
                std::env::var("S3_ENDPOINT_URL")
                    .unwrap_or_else(|_| "http://localhost:19000".to_string()),
            ),
            access_key: std::env::var("S3_ACCESS_KEY_ID").ok(),
            secret_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
            bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "commoncrawl".to_string()),
            region: "us-east-1".to_string(),
            local_dir: None,
        }
    }
}

impl StoreConfig {
    pub fn s3_settings(&self) -> ccshard_core::S3Settings {
        ccshard_core::S3Settings {
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            bucket: self.bucket.clone(),
            region: self.region.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind: IpAddr,
    pub batcher_port: u16,
    pub worker_port: u16,
    /// Directory for the on-exit text dumps
    pub dump_dir: PathBuf,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            batcher_port: 9000,
            worker_port: 9001,
            dump_dir: PathBuf::from("./temp"),
        }
    }
}

impl MetricsConfig {
    pub fn addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind, port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// HuggingFace `tokenizer.json`
    pub path: PathBuf,
    /// Name recorded in sample metadata
    pub name: String,
    pub eos_token: String,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tokenizer.json"),
            name: "gpt2".to_string(),
            eos_token: "<|endoftext|>".to_string(),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./ccshard.toml (current directory)
    /// 2. ~/.config/ccshard/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("ccshard.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "ccshard") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
