use chrono::{DateTime, Utc};

use bluefusion_types::Address;

use crate::config::{retry_delay, ConnectionConfig};
use crate::metrics::ConnectionMetrics;
use crate::state::ConnectionState;

/// One device under auto-connect management.
#[derive(Debug, Clone)]
pub struct ManagedConnection {
    pub address: Address,
    pub config: ConnectionConfig,
    pub state: ConnectionState,
    pub retry_count: u32,
    pub metrics: ConnectionMetrics,
    pub enabled: bool,
    pub paused_until: Option<DateTime<Utc>>,
}

impl ManagedConnection {
    pub fn new(address: Address, config: ConnectionConfig) -> Self {
        ManagedConnection {
            address,
            config,
            state: ConnectionState::Disconnected,
            retry_count: 0,
            metrics: ConnectionMetrics::default(),
            enabled: true,
            paused_until: None,
        }
    }

    /// `false` if disabled, paused, or past either retry ceiling.
    pub fn should_retry(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.state == ConnectionState::Paused {
            return false;
        }
        if self.retry_count >= self.config.max_retries {
            return false;
        }
        if self.metrics.consecutive_failures >= self.config.max_consecutive_failures {
            return false;
        }
        true
    }

    pub fn next_retry_delay(&self) -> std::time::Duration {
        retry_delay(&self.config, self.retry_count)
    }

    pub fn pause_until(&mut self, deadline: DateTime<Utc>) {
        self.state = ConnectionState::Paused;
        self.paused_until = Some(deadline);
    }

    pub fn pause_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.map(|deadline| now >= deadline).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryStrategy;
    use std::time::Duration;

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:01".parse().unwrap()
    }

    #[test]
    fn exponential_backoff_retry_delays_and_cutoff() {
        // max_retries=3, exponential, initial=1s, max=60s.
        let config = ConnectionConfig {
            max_retries: 3,
            max_consecutive_failures: 100,
            strategy: RetryStrategy::ExponentialBackoff,
            initial_retry_delay: Duration::from_secs_f64(1.0),
            max_retry_delay: Duration::from_secs_f64(60.0),
            ..ConnectionConfig::default()
        };
        let mut conn = ManagedConnection::new(addr(), config);

        assert_eq!(conn.next_retry_delay(), Duration::from_secs_f64(1.0));
        conn.metrics.record_attempt();
        conn.metrics.record_failure();
        conn.retry_count += 1;

        assert_eq!(conn.next_retry_delay(), Duration::from_secs_f64(2.0));
        conn.metrics.record_attempt();
        conn.metrics.record_failure();
        conn.retry_count += 1;

        assert_eq!(conn.next_retry_delay(), Duration::from_secs_f64(4.0));
        conn.metrics.record_attempt();
        conn.metrics.record_failure();
        conn.retry_count += 1;

        assert!(!conn.should_retry());
    }

    #[test]
    fn disabled_device_never_retries() {
        let mut conn = ManagedConnection::new(addr(), ConnectionConfig::default());
        conn.enabled = false;
        assert!(!conn.should_retry());
    }
}
