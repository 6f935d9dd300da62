//! Worker configuration
//!
//! Shard prefix and rotation limits belong to the [`ShardWriter`] the
//! worker is given.
//!
//! [`ShardWriter`]: crate::ShardWriter

/// Document filtering for the consume loop
#[derive(Debug, Clone)]
pub struct Config {
    /// Inclusive bounds on extracted text length, in characters
    pub min_chars: usize,
    pub max_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_chars: 500,
            max_chars: 1_000_000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_chars > self.max_chars {
            return Err(format!(
                "min_chars ({}) exceeds max_chars ({})",
                self.min_chars, self.max_chars
            ));
        }
        Ok(())
    }

    /// Whether a text of `chars` characters is within bounds
    pub fn accepts_length(&self, chars: usize) -> bool {
        (self.min_chars..=self.max_chars).contains(&chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!((config.min_chars, config.max_chars), (500, 1_000_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let config = Config::default();
        assert!(!config.accepts_length(499));
        assert!(config.accepts_length(500));
        assert!(config.accepts_length(1_000_000));
        assert!(!config.accepts_length(1_000_001));
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = Config::default();
        config.min_chars = 10;
        config.max_chars = 5;
        assert!(config.validate().is_err());
    }
}
