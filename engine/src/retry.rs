//! Retry budget and backoff schedule for outbox delivery.

use serde::{Deserialize, Serialize};

/// Capped exponential backoff with a fixed attempt budget.
///
/// The delay after the k-th failure is `min(initial · 2^(k-1), max)`; with
/// the defaults that is 1s, 2s, 4s, 8s, 16s, capped at 32s. An entry that
/// fails `max_attempts` times is dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay after the first failure (milliseconds)
    pub initial_delay_ms: u64,
    /// Upper bound on any delay (milliseconds)
    pub max_delay_ms: u64,
    /// Failed attempts before an entry is dead-lettered
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 32_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the number of failures so far.
    pub fn delay_ms(&self, failures: u32) -> u64 {
        if failures == 0 {
            return 0;
        }
        let doublings = failures.saturating_sub(1).min(63);
        self.initial_delay_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_delay_ms)
    }

    /// True once the attempt budget is spent.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_to_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ms(0), 0);
        assert_eq!(policy.delay_ms(1), 1_000);
        assert_eq!(policy.delay_ms(2), 2_000);
        assert_eq!(policy.delay_ms(3), 4_000);
        assert_eq!(policy.delay_ms(4), 8_000);
        assert_eq!(policy.delay_ms(5), 16_000);
        assert_eq!(policy.delay_ms(6), 32_000);
        assert_eq!(policy.delay_ms(7), 32_000); // capped
    }

    #[test]
    fn budget_is_five_attempts() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(4));
        assert!(policy.exhausted(5));
        assert!(policy.exhausted(6));
    }

    #[test]
    fn huge_failure_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_ms(u32::MAX), policy.max_delay_ms);
    }
}
