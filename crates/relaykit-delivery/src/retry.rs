//! Backoff between retry attempts inside one breaker call.
//!
//! The default policy retries immediately. Deployments that deliver to
//! endpoints with slow recovery can configure a fixed, linear, or exponential
//! delay with jitter; the delay is capped at `max_delay`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay schedule applied before each retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for the backoff calculation. Zero disables backoff.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: delay doubles each retry.
    Exponential,
    /// Linear backoff: delay grows by the base amount each retry.
    Linear,
}

impl RetryPolicy {
    /// Retries without waiting.
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }

    /// Exponential backoff from `base_delay`, capped at `max_delay`, ±25% jitter.
    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay, jitter_factor: 0.25, backoff_strategy: BackoffStrategy::Exponential }
    }

    /// Delay before the given retry (1 for the first retry).
    pub fn delay_for_retry(&self, retry_number: u32) -> Duration {
        if self.base_delay.is_zero() || retry_number == 0 {
            return Duration::ZERO;
        }

        let base_delay = match self.backoff_strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry_number),
            BackoffStrategy::Exponential => {
                let exponent = retry_number.saturating_sub(1).min(20);
                self.base_delay.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped_delay = std::cmp::min(base_delay, self.max_delay);
        let jittered_delay = apply_jitter(capped_delay, self.jitter_factor);

        std::cmp::min(jittered_delay, self.max_delay)
    }
}

/// Randomizes the delay by ±`jitter_factor` of its length.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: strategy,
        }
    }

    #[test]
    fn default_policy_never_waits() {
        let policy = RetryPolicy::default();
        for retry in 0..10 {
            assert_eq!(policy.delay_for_retry(retry), Duration::ZERO);
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = no_jitter(BackoffStrategy::Exponential);
        let delays: Vec<_> = (1..=4).map(|retry| policy.delay_for_retry(retry)).collect();

        assert_eq!(delays, vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]);
    }

    #[test]
    fn linear_and_fixed_backoff() {
        let linear = no_jitter(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for_retry(3), Duration::from_millis(300));

        let fixed = no_jitter(BackoffStrategy::Fixed);
        assert_eq!(fixed.delay_for_retry(1), fixed.delay_for_retry(7));
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy { max_delay: Duration::from_secs(1), ..no_jitter(BackoffStrategy::Exponential) };
        assert_eq!(policy.delay_for_retry(30), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5) && jittered <= Duration::from_secs(15));
            seen.insert(jittered.as_millis());
        }

        assert!(seen.len() > 1, "jitter should create variation");
    }
}
