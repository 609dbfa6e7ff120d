//! Recognized client configuration options.

use std::time::Duration;

/// Configuration consumed by the conversion and binding layer.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Map timestamp ±infinity sentinels to the application's
    /// `Timestamp::INFINITY`/`Timestamp::NEG_INFINITY` values. When
    /// disabled, decoding a sentinel fails and encoding one is rejected.
    pub enable_infinity_conversions: bool,
    /// Default timeout applied by the command layer.
    pub default_command_timeout: Duration,
    /// Cap on pooled objects (per pool), including recycled wire buffers.
    pub max_pool_size: usize,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            enable_infinity_conversions: false,
            default_command_timeout: Duration::from_secs(30),
            max_pool_size: 128,
        }
    }
}

impl PgConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable timestamp infinity conversions.
    pub fn enable_infinity_conversions(mut self, enabled: bool) -> Self {
        self.enable_infinity_conversions = enabled;
        self
    }

    /// Set the default command timeout.
    pub fn default_command_timeout(mut self, timeout: Duration) -> Self {
        self.default_command_timeout = timeout;
        self
    }

    /// Set the pooled-object cap.
    pub fn max_pool_size(mut self, max: usize) -> Self {
        self.max_pool_size = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PgConfig::default();
        assert!(!config.enable_infinity_conversions);
        assert_eq!(config.default_command_timeout, Duration::from_secs(30));
        assert_eq!(config.max_pool_size, 128);
    }

    #[test]
    fn test_builder_setters() {
        let config = PgConfig::new()
            .enable_infinity_conversions(true)
            .max_pool_size(8);
        assert!(config.enable_infinity_conversions);
        assert_eq!(config.max_pool_size, 8);
    }
}
