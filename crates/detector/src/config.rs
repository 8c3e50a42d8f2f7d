use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_PARALLEL_CALLS, DEFAULT_QUEUE_CAPACITY};

/// Tuning knobs of the check scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Maximum number of units running at once, which bounds the number of
    /// simultaneous remote calls
    #[serde(default = "SchedulerConfig::default_parallel_calls")]
    pub parallel_calls: usize,

    /// How many submitted units may wait for an execution slot before
    /// submission blocks
    #[serde(default = "SchedulerConfig::default_queue_capacity")]
    pub queue_capacity: usize,

    /// Bound for every single remote call, in seconds
    #[serde(default = "SchedulerConfig::default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Bound for the whole run, in seconds
    #[serde(default = "SchedulerConfig::default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Delay between two periodic runs, in seconds
    #[serde(default = "SchedulerConfig::default_interval_secs")]
    pub interval_secs: u64,
}

impl SchedulerConfig {
    fn default_parallel_calls() -> usize {
        DEFAULT_PARALLEL_CALLS
    }

    fn default_queue_capacity() -> usize {
        DEFAULT_QUEUE_CAPACITY
    }

    fn default_call_timeout_secs() -> u64 {
        DEFAULT_CALL_TIMEOUT_SECS
    }

    fn default_run_timeout_secs() -> u64 {
        600
    }

    fn default_interval_secs() -> u64 {
        3600
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallel_calls: Self::default_parallel_calls(),
            queue_capacity: Self::default_queue_capacity(),
            call_timeout_secs: Self::default_call_timeout_secs(),
            run_timeout_secs: Self::default_run_timeout_secs(),
            interval_secs: Self::default_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "parallel_calls": 2 }"#).unwrap();

        assert_eq!(config.parallel_calls, 2);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.call_timeout(), Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS));
        assert_eq!(config.run_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<SchedulerConfig>(r#"{ "workers": 2 }"#);
        assert!(parsed.is_err());
    }
}
