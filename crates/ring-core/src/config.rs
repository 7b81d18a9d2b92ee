//! Protocol timing configuration.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Timing knobs for the ring protocol.
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    /// Wait between failed dials to the successor (default: 1s)
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// How long the leader waits for its HEALTHY probe to come back (default: 2s)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// How long an election initiator waits before re-sending (default: 2s)
    #[serde(default = "default_election_retry_ms")]
    pub election_retry_ms: u64,

    /// Lower bound of the delay before a watcher starts an election (default: 1s)
    #[serde(default = "default_election_delay_min_ms")]
    pub election_delay_min_ms: u64,

    /// Upper bound of that delay (default: 3s)
    #[serde(default = "default_election_delay_max_ms")]
    pub election_delay_max_ms: u64,

    /// Timeout for a single variable push to a slave (default: 5s)
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    /// Emit a TIMESTAMP wave after every handled message (default: on)
    #[serde(default = "default_true")]
    pub logical_clock: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            election_retry_ms: default_election_retry_ms(),
            election_delay_min_ms: default_election_delay_min_ms(),
            election_delay_max_ms: default_election_delay_max_ms(),
            push_timeout_ms: default_push_timeout_ms(),
            logical_clock: default_true(),
        }
    }
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

fn default_health_check_timeout_ms() -> u64 {
    2000
}

fn default_election_retry_ms() -> u64 {
    2000
}

fn default_election_delay_min_ms() -> u64 {
    1000
}

fn default_election_delay_max_ms() -> u64 {
    3000
}

fn default_push_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl RingConfig {
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn election_retry(&self) -> Duration {
        Duration::from_millis(self.election_retry_ms)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    /// Range the election start delay is drawn from. A max below the min is
    /// treated as the min.
    pub fn election_delay_range(&self) -> RangeInclusive<u64> {
        let min = self.election_delay_min_ms;
        min..=self.election_delay_max_ms.max(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RingConfig::default();
        assert_eq!(config.reconnect_backoff(), Duration::from_secs(1));
        assert_eq!(config.health_check_timeout(), Duration::from_secs(2));
        assert_eq!(config.election_retry(), Duration::from_secs(2));
        assert_eq!(config.election_delay_range(), 1000..=3000);
        assert!(config.logical_clock);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RingConfig =
            serde_json::from_str(r#"{"health_check_timeout_ms": 250, "logical_clock": false}"#)
                .unwrap();
        assert_eq!(config.health_check_timeout_ms, 250);
        assert!(!config.logical_clock);
        assert_eq!(config.reconnect_backoff_ms, 1000);
    }

    #[test]
    fn test_inverted_delay_range_collapses() {
        let config = RingConfig {
            election_delay_min_ms: 500,
            election_delay_max_ms: 100,
            ..Default::default()
        };
        assert_eq!(config.election_delay_range(), 500..=500);
    }
}
