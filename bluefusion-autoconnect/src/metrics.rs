use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::secs_f64;

/// Rolling connection-quality metrics for one managed device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(with = "secs_f64")]
    pub average_connection_time: Duration,
    #[serde(with = "secs_f64")]
    pub uptime: Duration,
    pub consecutive_failures: u32,
}

impl ConnectionMetrics {
    /// `successful / total_attempts`, `0.0` before any attempt.
    pub fn stability_score(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful as f64 / self.total_attempts as f64
        }
    }

    pub fn record_attempt(&mut self) {
        self.total_attempts += 1;
    }

    pub fn record_success(&mut self, connection_time: Duration) {
        self.successful += 1;
        self.consecutive_failures = 0;
        self.last_connected = Some(Utc::now());
        let n = self.successful as f64;
        let prev_avg = self.average_connection_time.as_secs_f64();
        let new_avg = prev_avg + (connection_time.as_secs_f64() - prev_avg) / n;
        self.average_connection_time = Duration::from_secs_f64(new_avg.max(0.0));
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(Utc::now());
    }
}
