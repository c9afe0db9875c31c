//! Queue configuration.

use std::str::FromStr;
use std::time::Duration;

use sploot_queue::DEFAULT_STORAGE_KEY;

/// Embedding queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum embedding jobs in flight
    pub max_concurrent: usize,
    /// First backoff step for the standard schedule (doubles each retry)
    pub base_delay: Duration,
    /// Ceiling for any backoff delay
    pub max_delay: Duration,
    /// Delay before the first retry after a network failure
    pub network_initial_delay: Duration,
    /// First backoff step after a rate-limit failure
    pub rate_limit_base_delay: Duration,
    /// Attempt budget for background uploads
    pub max_retries_background: u32,
    /// Attempt budget for user-triggered uploads
    pub max_retries_user_triggered: u32,
    /// Storage key holding the pending snapshot
    pub storage_key: String,
    /// Persisted items older than this are not restored
    pub persistence_max_age: Duration,
    /// Per-attempt timeout; `None` lets the provider call run unbounded
    pub job_timeout: Option<Duration>,
    /// Start dispatching when an item is added to a stopped queue
    pub auto_start: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            network_initial_delay: Duration::from_millis(100),
            rate_limit_base_delay: Duration::from_secs(5),
            max_retries_background: 3,
            max_retries_user_triggered: 5,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            persistence_max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
            job_timeout: None,
            auto_start: true,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    ///
    /// Unset or unparsable variables fall back to [`QueueConfig::default`].
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `SPLOOT_QUEUE_MAX_CONCURRENT` | `max_concurrent` (at least 1) |
    /// | `SPLOOT_QUEUE_BASE_DELAY_MS` | `base_delay` |
    /// | `SPLOOT_QUEUE_MAX_DELAY_MS` | `max_delay` |
    /// | `SPLOOT_QUEUE_NETWORK_DELAY_MS` | `network_initial_delay` |
    /// | `SPLOOT_QUEUE_RATE_LIMIT_DELAY_MS` | `rate_limit_base_delay` |
    /// | `SPLOOT_QUEUE_MAX_RETRIES` | `max_retries_background` |
    /// | `SPLOOT_QUEUE_MAX_RETRIES_USER` | `max_retries_user_triggered` |
    /// | `SPLOOT_QUEUE_STORAGE_KEY` | `storage_key` |
    /// | `SPLOOT_QUEUE_MAX_AGE_SECS` | `persistence_max_age` |
    /// | `SPLOOT_QUEUE_JOB_TIMEOUT_SECS` | `job_timeout` (unset means no timeout) |
    /// | `SPLOOT_QUEUE_AUTO_START` | `auto_start` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: env_or("SPLOOT_QUEUE_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            base_delay: Duration::from_millis(env_or(
                "SPLOOT_QUEUE_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_or(
                "SPLOOT_QUEUE_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )),
            network_initial_delay: Duration::from_millis(env_or(
                "SPLOOT_QUEUE_NETWORK_DELAY_MS",
                defaults.network_initial_delay.as_millis() as u64,
            )),
            rate_limit_base_delay: Duration::from_millis(env_or(
                "SPLOOT_QUEUE_RATE_LIMIT_DELAY_MS",
                defaults.rate_limit_base_delay.as_millis() as u64,
            )),
            max_retries_background: env_or(
                "SPLOOT_QUEUE_MAX_RETRIES",
                defaults.max_retries_background,
            ),
            max_retries_user_triggered: env_or(
                "SPLOOT_QUEUE_MAX_RETRIES_USER",
                defaults.max_retries_user_triggered,
            ),
            storage_key: std::env::var("SPLOOT_QUEUE_STORAGE_KEY")
                .unwrap_or(defaults.storage_key),
            persistence_max_age: Duration::from_secs(env_or(
                "SPLOOT_QUEUE_MAX_AGE_SECS",
                defaults.persistence_max_age.as_secs(),
            )),
            job_timeout: std::env::var("SPLOOT_QUEUE_JOB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            auto_start: env_or("SPLOOT_QUEUE_AUTO_START", defaults.auto_start),
        }
    }

    /// Set the concurrency bound.
    ///
    /// # Arguments
    /// * `max_concurrent` - Jobs allowed in flight; zero is raised to 1
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Set the standard backoff base and ceiling.
    ///
    /// # Arguments
    /// * `base_delay` - Delay before the first retry; doubles on each later one
    /// * `max_delay` - Upper bound for every backoff schedule
    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the delay before the first retry of a network failure.
    pub fn with_network_initial_delay(mut self, delay: Duration) -> Self {
        self.network_initial_delay = delay;
        self
    }

    /// Set the first backoff step after a rate-limit failure.
    pub fn with_rate_limit_base_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_base_delay = delay;
        self
    }

    /// Set the storage key the pending snapshot is written under.
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Set how old a snapshot or item may be and still be restored.
    pub fn with_persistence_max_age(mut self, max_age: Duration) -> Self {
        self.persistence_max_age = max_age;
        self
    }

    /// Bound each provider call.
    ///
    /// # Arguments
    /// * `timeout` - Per-attempt limit; `None` lets calls run unbounded
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Choose whether adding to a stopped queue starts dispatch.
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

/// Parse `name` from the environment, or return `default` if it is unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.max_retries_background, 3);
        assert_eq!(config.max_retries_user_triggered, 5);
        assert_eq!(config.storage_key, "sploot_embedding_queue");
        assert!(config.network_initial_delay < config.base_delay);
        assert!(config.rate_limit_base_delay > config.base_delay);
        assert!(config.auto_start);
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = QueueConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent, 1);
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("SPLOOT_QUEUE_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or("SPLOOT_QUEUE_TEST_GARBAGE", 7u32), 7);
        assert!(env_or("SPLOOT_QUEUE_TEST_MISSING", true));
    }
}
