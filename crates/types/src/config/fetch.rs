//! Fetcher tuning: scan batching, cancellation checks, history bounds.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Largest accepted scan batch.
const MAX_SCAN_BATCH_SIZE: usize = 65_536;

/// Fetcher configuration.
///
/// # Validation Rules
///
/// - `scan_batch_size` must be 1-65536
/// - `cancellation_check_interval` must be >= 1
/// - `scan_timeout`, when set, must be non-zero
///
/// # Example
///
/// ```no_run
/// # use docshard_types::config::FetchConfig;
/// # use std::time::Duration;
/// let config = FetchConfig::builder()
///     .scan_batch_size(512)
///     .scan_timeout(Duration::from_secs(30))
///     .build()
///     .expect("valid fetch config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FetchConfig {
    /// Entries buffered per refill by store iterators.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    /// Index entries scanned between execution-scope checks.
    #[serde(default = "default_cancellation_check_interval")]
    pub cancellation_check_interval: usize,
    /// Upper bound on commits replayed by one versioned seek. `0` is unlimited.
    #[serde(default)]
    pub max_history_depth: usize,
    /// Deadline applied to a scan when the caller supplies none.
    #[serde(default, with = "super::humantime_serde_opt")]
    #[schemars(with = "Option<String>")]
    pub scan_timeout: Option<Duration>,
}

#[bon::bon]
impl FetchConfig {
    /// Creates a new fetch configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `scan_batch_size` is 0 or > 65536
    /// - `cancellation_check_interval` is 0
    /// - `scan_timeout` is zero
    #[builder]
    pub fn new(
        #[builder(default = default_scan_batch_size())] scan_batch_size: usize,
        #[builder(default = default_cancellation_check_interval())]
        cancellation_check_interval: usize,
        #[builder(default)] max_history_depth: usize,
        scan_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { scan_batch_size, cancellation_check_interval, max_history_depth, scan_timeout };
        config.validate()?;
        Ok(config)
    }
}

impl FetchConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_batch_size == 0 || self.scan_batch_size > MAX_SCAN_BATCH_SIZE {
            return Err(ConfigError::Validation {
                message: format!(
                    "scan_batch_size must be 1-{}, got {}",
                    MAX_SCAN_BATCH_SIZE, self.scan_batch_size
                ),
            });
        }
        if self.cancellation_check_interval == 0 {
            return Err(ConfigError::Validation {
                message: "cancellation_check_interval must be >= 1".to_string(),
            });
        }
        if self.scan_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation {
                message: "scan_timeout must be non-zero when set".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            scan_batch_size: default_scan_batch_size(),
            cancellation_check_interval: default_cancellation_check_interval(),
            max_history_depth: 0,
            scan_timeout: None,
        }
    }
}

fn default_scan_batch_size() -> usize {
    256
}

fn default_cancellation_check_interval() -> usize {
    64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_defaults_are_valid() {
        let config = FetchConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config, FetchConfig::default());
        assert_eq!(config.scan_batch_size, 256);
        assert_eq!(config.cancellation_check_interval, 64);
        assert_eq!(config.max_history_depth, 0);
        assert!(config.scan_timeout.is_none());
    }

    #[test]
    fn test_fetch_config_rejects_zero_batch() {
        let err = FetchConfig::builder().scan_batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("scan_batch_size"));
    }

    #[test]
    fn test_fetch_config_rejects_oversized_batch() {
        assert!(FetchConfig::builder().scan_batch_size(MAX_SCAN_BATCH_SIZE + 1).build().is_err());
        assert!(FetchConfig::builder().scan_batch_size(MAX_SCAN_BATCH_SIZE).build().is_ok());
    }

    #[test]
    fn test_fetch_config_rejects_zero_check_interval() {
        let err = FetchConfig::builder().cancellation_check_interval(0).build().unwrap_err();
        assert!(err.to_string().contains("cancellation_check_interval"));
    }

    #[test]
    fn test_fetch_config_rejects_zero_timeout() {
        assert!(FetchConfig::builder().scan_timeout(Duration::ZERO).build().is_err());
    }

    #[test]
    fn test_fetch_config_serde_humantime_timeout() {
        let json = r#"{"scan_batch_size": 8, "scan_timeout": "1m 30s"}"#;
        let config: FetchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.scan_batch_size, 8);
        assert_eq!(config.cancellation_check_interval, 64);
        assert_eq!(config.scan_timeout, Some(Duration::from_secs(90)));
        config.validate().unwrap();

        let back = serde_json::to_string(&config).unwrap();
        let again: FetchConfig = serde_json::from_str(&back).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn test_fetch_config_serde_missing_timeout() {
        let config: FetchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, FetchConfig::default());
    }
}
