use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Router-side tuning for DDL coordination
///
/// All values are process-wide and fixed at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum re-sends on a transient failure for a retriable command
    pub max_retry_attempts: u32,

    /// Re-sends after a version-staleness reply (each preceded by a cache refresh)
    pub stale_retry_attempts: u32,

    /// Pause between a failed attempt and the next one
    pub retry_backoff: Duration,

    /// Per-command network timeout
    pub command_timeout: Option<Duration>,

    /// Maximum number of database and collection entries held by the topology cache
    pub cache_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            stale_retry_attempts: 1,
            retry_backoff: Duration::ZERO,
            command_timeout: None,
            cache_capacity: 1024,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transient-failure retry bound
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    /// Set the stale-version retry bound
    pub fn stale_retry_attempts(mut self, attempts: u32) -> Self {
        self.stale_retry_attempts = attempts;
        self
    }

    /// Set the pause between attempts
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the per-command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Set the topology cache capacity; zero is treated as one
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RouterConfig::new()
            .max_retry_attempts(5)
            .stale_retry_attempts(2)
            .command_timeout(Duration::from_secs(10))
            .cache_capacity(16);

        assert_eq!(config.max_retry_attempts, 5);
        assert_eq!(config.stale_retry_attempts, 2);
        assert_eq!(config.command_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.retry_backoff, Duration::ZERO);
    }

    #[test]
    fn test_config_partial_deserialize_uses_defaults() {
        let config: RouterConfig =
            serde_json::from_str(r#"{"max_retry_attempts": 7}"#).unwrap();
        assert_eq!(config.max_retry_attempts, 7);
        assert_eq!(config.stale_retry_attempts, 1);
        assert_eq!(config.cache_capacity, 1024);
    }
}
