//! Retry classification with exponential backoff.
//!
//! Maps a failed attempt plus the item's history to a [`RetryDecision`]:
//!
//! | kind           | decision                                              |
//! |----------------|-------------------------------------------------------|
//! | `invalid_image`| terminal, regardless of budget                        |
//! | `network`      | retry; prompt on the first network failure, then backoff |
//! | `rate_limit`   | retry on a longer schedule, honoring `retry_after`     |
//! | `unknown`      | retry on the standard schedule                        |
//!
//! Any retryable failure becomes terminal once `retry_count + 1` reaches the
//! item's budget (5 for user-triggered uploads, 3 otherwise).

use std::time::Duration;

use sploot_models::{ErrorType, QueueItem};

use crate::config::QueueConfig;
use crate::error::EmbedError;

/// Why an item stops being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The input can never be embedded
    InvalidInput,
    /// The attempt budget is spent
    RetriesExhausted,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::InvalidInput => "invalid_input",
            TerminalReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-admit the item after `delay`.
    Retry { delay: Duration },
    /// Remove the item and report it failed.
    Terminal(TerminalReason),
}

impl RetryDecision {
    pub fn is_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Retry budget and backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub network_initial_delay: Duration,
    pub rate_limit_base_delay: Duration,
    pub max_retries_background: u32,
    pub max_retries_user_triggered: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            network_initial_delay: config.network_initial_delay,
            rate_limit_base_delay: config.rate_limit_base_delay,
            max_retries_background: config.max_retries_background,
            max_retries_user_triggered: config.max_retries_user_triggered,
        }
    }

    /// Attempt budget for `item`.
    pub fn max_retries(&self, item: &QueueItem) -> u32 {
        if item.is_user_triggered {
            self.max_retries_user_triggered
        } else {
            self.max_retries_background
        }
    }

    /// Delay for the `retry_number`-th retry (1-based):
    /// `min(base * 2^(n-1), max_delay)`.
    pub fn backoff(&self, base: Duration, retry_number: u32) -> Duration {
        let exponent = retry_number.saturating_sub(1);
        let factor = 2u32.saturating_pow(exponent);
        base.saturating_mul(factor).min(self.max_delay)
    }

    /// Decide what happens after `item` failed with `error`.
    ///
    /// `item` is the state before the failure is recorded.
    pub fn classify(&self, error: &EmbedError, item: &QueueItem) -> RetryDecision {
        let error_type = error.error_type();

        if !error_type.is_retryable() {
            return RetryDecision::Terminal(TerminalReason::InvalidInput);
        }

        if item.retry_count.saturating_add(1) >= self.max_retries(item) {
            return RetryDecision::Terminal(TerminalReason::RetriesExhausted);
        }

        let retry_number = item.retry_count + 1;
        let delay = match error_type {
            ErrorType::Network if item.error_type != Some(ErrorType::Network) => {
                self.network_initial_delay.min(self.max_delay)
            }
            ErrorType::RateLimit => {
                let scheduled = self.backoff(self.rate_limit_base_delay, retry_number);
                match error.retry_after() {
                    Some(hint) => scheduled.max(hint).min(self.max_delay),
                    None => scheduled,
                }
            }
            _ => self.backoff(self.base_delay, retry_number),
        };

        RetryDecision::Retry { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item_after(failures: u32, last: Option<ErrorType>) -> QueueItem {
        let mut item = QueueItem::new("asset", "u", "c");
        item.retry_count = failures;
        item.error_type = last;
        item
    }

    fn delay_of(decision: RetryDecision) -> Duration {
        match decision {
            RetryDecision::Retry { delay } => delay,
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let base = Duration::from_secs(1);

        assert_eq!(policy.backoff(base, 1), Duration::from_secs(1));
        assert_eq!(policy.backoff(base, 2), Duration::from_secs(2));
        assert_eq!(policy.backoff(base, 3), Duration::from_secs(4));
        assert_eq!(policy.backoff(base, 6), Duration::from_secs(30));
        assert_eq!(policy.backoff(base, 200), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_image_is_terminal_immediately() {
        let policy = RetryPolicy::default();
        let decision = policy.classify(&EmbedError::invalid_image("corrupt"), &item_after(0, None));
        assert_eq!(decision, RetryDecision::Terminal(TerminalReason::InvalidInput));
    }

    #[test]
    fn test_unknown_uses_standard_schedule() {
        let policy = RetryPolicy::default();
        let err = EmbedError::other("500");

        assert_eq!(delay_of(policy.classify(&err, &item_after(0, None))), Duration::from_secs(1));
        assert_eq!(
            delay_of(policy.classify(&err, &item_after(1, Some(ErrorType::Unknown)))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_first_network_failure_retries_promptly() {
        let policy = RetryPolicy::default();
        let err = EmbedError::network("connection reset");

        assert_eq!(
            delay_of(policy.classify(&err, &item_after(0, None))),
            Duration::from_millis(100)
        );
        // Switching to network from another kind is still prompt.
        assert_eq!(
            delay_of(policy.classify(&err, &item_after(1, Some(ErrorType::Unknown)))),
            Duration::from_millis(100)
        );
        // Repeated network failures back off.
        assert_eq!(
            delay_of(policy.classify(&err, &item_after(1, Some(ErrorType::Network)))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_rate_limit_waits_longer() {
        let policy = RetryPolicy::default();
        let plain = policy.classify(&EmbedError::rate_limited("429", None), &item_after(0, None));
        assert_eq!(delay_of(plain), Duration::from_secs(5));

        let hinted = policy.classify(
            &EmbedError::rate_limited("429", Some(Duration::from_secs(12))),
            &item_after(0, None),
        );
        assert_eq!(delay_of(hinted), Duration::from_secs(12));

        let absurd = policy.classify(
            &EmbedError::rate_limited("429", Some(Duration::from_secs(3600))),
            &item_after(0, None),
        );
        assert_eq!(delay_of(absurd), Duration::from_secs(30));
    }

    #[test]
    fn test_background_budget() {
        let policy = RetryPolicy::default();
        let err = EmbedError::network("down");

        assert!(policy.classify(&err, &item_after(0, None)).is_retry());
        assert!(policy.classify(&err, &item_after(1, Some(ErrorType::Network))).is_retry());
        assert_eq!(
            policy.classify(&err, &item_after(2, Some(ErrorType::Network))),
            RetryDecision::Terminal(TerminalReason::RetriesExhausted)
        );
    }

    #[test]
    fn test_user_triggered_budget() {
        let policy = RetryPolicy::default();
        let err = EmbedError::other("flaky");

        let mut item = item_after(3, Some(ErrorType::Unknown));
        item.is_user_triggered = true;
        assert_eq!(policy.max_retries(&item), 5);
        assert!(policy.classify(&err, &item).is_retry());

        item.retry_count = 4;
        assert_eq!(
            policy.classify(&err, &item),
            RetryDecision::Terminal(TerminalReason::RetriesExhausted)
        );
    }
}
