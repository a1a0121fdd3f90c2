use std::time::Duration;

use serde::{Deserialize, Serialize};

/// (De)serializes a `Duration` as a float number of seconds, matching the
/// snapshot format real HFP tooling expects instead of serde's default
/// `{"secs":_,"nanos":_}` object.
pub(crate) mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Backoff shape for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ExponentialBackoff,
    LinearBackoff,
    FixedInterval,
}

/// Admission priority class; high-priority devices are started before
/// medium/low when concurrency is limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Per-device connection policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub max_retries: u32,
    #[serde(with = "secs_f64")]
    pub initial_retry_delay: Duration,
    #[serde(with = "secs_f64")]
    pub max_retry_delay: Duration,
    #[serde(rename = "retry_strategy")]
    pub strategy: RetryStrategy,
    #[serde(with = "secs_f64")]
    pub connection_timeout: Duration,
    pub reconnect_on_failure: bool,
    #[serde(with = "secs_f64")]
    pub health_check_interval: Duration,
    #[serde(with = "secs_f64")]
    pub stability_check_interval: Duration,
    pub max_consecutive_failures: u32,
    pub priority: Priority,
    pub max_concurrent_connections: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_retries: 5,
            initial_retry_delay: Duration::from_secs_f64(1.0),
            max_retry_delay: Duration::from_secs_f64(60.0),
            strategy: RetryStrategy::ExponentialBackoff,
            connection_timeout: Duration::from_secs_f64(30.0),
            reconnect_on_failure: true,
            health_check_interval: Duration::from_secs_f64(30.0),
            stability_check_interval: Duration::from_secs_f64(10.0),
            max_consecutive_failures: 3,
            priority: Priority::Medium,
            max_concurrent_connections: 5,
        }
    }
}

/// Retry delay for `retry` (0-based attempt count), by strategy, capped at
/// `max_retry_delay`.
pub fn retry_delay(config: &ConnectionConfig, retry: u32) -> Duration {
    let initial = config.initial_retry_delay.as_secs_f64();
    let seconds = match config.strategy {
        RetryStrategy::ExponentialBackoff => initial * 2f64.powi(retry as i32),
        RetryStrategy::LinearBackoff => initial * (1.0 + retry as f64),
        RetryStrategy::FixedInterval => initial,
    };
    Duration::from_secs_f64(seconds).min(config.max_retry_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let config = ConnectionConfig {
            max_retries: 3,
            initial_retry_delay: Duration::from_secs_f64(1.0),
            max_retry_delay: Duration::from_secs_f64(60.0),
            strategy: RetryStrategy::ExponentialBackoff,
            ..ConnectionConfig::default()
        };
        assert_eq!(retry_delay(&config, 0), Duration::from_secs_f64(1.0));
        assert_eq!(retry_delay(&config, 1), Duration::from_secs_f64(2.0));
        assert_eq!(retry_delay(&config, 2), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn delay_never_exceeds_cap() {
        let config = ConnectionConfig {
            initial_retry_delay: Duration::from_secs_f64(10.0),
            max_retry_delay: Duration::from_secs_f64(30.0),
            strategy: RetryStrategy::ExponentialBackoff,
            ..ConnectionConfig::default()
        };
        assert_eq!(retry_delay(&config, 10), Duration::from_secs_f64(30.0));
    }
}
