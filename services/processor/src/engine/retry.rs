//! services/processor/src/engine/retry.rs
//!
//! Backoff schedule for transient provider failures.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per provider per pass, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to half the delay again at random.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Exponential delay before the attempt following `attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() / 2) as u64;
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
            jitter,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let p = policy(false);
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
        assert_eq!(p.delay_for(4), Duration::from_secs(3));
        assert_eq!(p.delay_for(60), Duration::from_secs(3));
    }

    #[test]
    fn jitter_stays_within_half_the_delay() {
        let p = policy(true);
        for _ in 0..50 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(1500), "{d:?}");
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let p = policy(false);
        assert!(p.allows_another(3));
        assert!(!p.allows_another(4));
    }
}
