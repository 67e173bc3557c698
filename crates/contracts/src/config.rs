//! PublishConfig - engine configuration, read once at construction
//!
//! Every field is optional in the config file; defaults follow the values
//! the engine has always shipped with.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct PublishConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Work distribution settings
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Statistics cache settings
    #[serde(default)]
    #[validate(nested)]
    pub stats: StatsConfig,

    /// Circuit breaker settings
    #[serde(default)]
    #[validate(nested)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Work distribution: prefetch window and backpressure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatchConfig {
    /// Items prepared per prefetch batch
    #[validate(range(min = 1))]
    pub prefetch_batch_size: usize,

    /// Prepared-count watermark below which the next batch is requested
    /// (None = half the batch size)
    pub prefetch_threshold: Option<usize>,

    /// Host load average above which dispatch is held back
    #[validate(range(exclusive_min = 0.0))]
    pub load_limit: f64,

    /// Sleep between saturation polls (milliseconds)
    #[validate(range(min = 1))]
    pub backpressure_poll_ms: u64,

    /// Push per-worker stats every N handed-out items
    #[validate(range(min = 1))]
    pub stats_report_every: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            prefetch_batch_size: 100,
            prefetch_threshold: None,
            load_limit: 2.0,
            backpressure_poll_ms: 1000,
            stats_report_every: 16,
        }
    }
}

impl DispatchConfig {
    /// Effective prefetch threshold
    pub fn prefetch_threshold(&self) -> usize {
        self.prefetch_threshold
            .unwrap_or(self.prefetch_batch_size / 2)
    }

    pub fn backpressure_poll_interval(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms)
    }
}

/// Statistics cache refresh schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StatsConfig {
    /// Refresh interval (milliseconds)
    #[validate(range(min = 1))]
    pub refresh_interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 60_000,
        }
    }
}

impl StatsConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Circuit breaker thresholds
///
/// Disabling is only active while both values are strictly positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures tolerated before a target is disabled (<= 0 disables)
    pub max_error_count: i64,

    /// How long a tripped target stays disabled (seconds)
    pub retry_delay_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Whether disabling targets is active at all
    pub fn is_active(&self) -> bool {
        self.max_error_count > 0 && self.retry_delay_secs > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PublishConfig::default();
        assert_eq!(config.dispatch.prefetch_batch_size, 100);
        assert_eq!(config.dispatch.prefetch_threshold(), 50);
        assert_eq!(config.dispatch.load_limit, 2.0);
        assert_eq!(
            config.dispatch.backpressure_poll_interval(),
            Duration::from_millis(1000)
        );
        assert_eq!(config.dispatch.stats_report_every, 16);
        assert!(!config.circuit_breaker.is_active());
    }

    #[test]
    fn test_explicit_threshold_wins() {
        let dispatch = DispatchConfig {
            prefetch_batch_size: 40,
            prefetch_threshold: Some(5),
            ..Default::default()
        };
        assert_eq!(dispatch.prefetch_threshold(), 5);
    }

    #[test]
    fn test_breaker_requires_both_thresholds() {
        let only_count = CircuitBreakerConfig {
            max_error_count: 3,
            retry_delay_secs: 0,
        };
        assert!(!only_count.is_active());

        let both = CircuitBreakerConfig {
            max_error_count: 3,
            retry_delay_secs: 60,
        };
        assert!(both.is_active());
    }

    #[test]
    fn test_range_validation() {
        let mut config = PublishConfig::default();
        assert!(config.validate().is_ok());

        config.dispatch.prefetch_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PublishConfig =
            serde_json::from_str(r#"{"dispatch": {"prefetch_batch_size": 20}}"#).unwrap();
        assert_eq!(config.dispatch.prefetch_batch_size, 20);
        assert_eq!(config.dispatch.prefetch_threshold(), 10);
        assert_eq!(config.stats.refresh_interval_ms, 60_000);
    }
}
