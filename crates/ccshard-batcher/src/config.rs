//! Batcher configuration

use std::path::PathBuf;

/// Runtime configuration for one batcher run
#[derive(Debug, Clone)]
pub struct Config {
    /// Cluster index listing the CDX chunks to scan
    pub index_path: PathBuf,
    /// Records per published batch
    pub batch_size: usize,
    /// Stop after this many batches (unbounded when `None`)
    pub max_batches: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("cluster.idx"),
            batch_size: 50,
            max_batches: None,
        }
    }
}

impl Config {
    /// Reject a zero batch size or a zero batch cap.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.max_batches == Some(0) {
            return Err("max_batches must be positive when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.batch_size, 50);
        assert!(config.max_batches.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_values_rejected() {
        let config = Config {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_batches: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
