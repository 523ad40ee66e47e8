//! Exponential backoff for transient provider failures.

use std::time::Duration;

use campaign_core::config::ChannelLimits;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_limits(limits: &ChannelLimits) -> Self {
        Self {
            max_retries: limits.max_retries,
            base: Duration::from_millis(limits.backoff_base_ms),
            max: Duration::from_millis(limits.backoff_max_ms),
            jitter: limits.backoff_jitter,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped
    /// at `max`. With jitter the delay is drawn from `[d/2, d]`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let delay = self.base.saturating_mul(factor).min(self.max);
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            let spread = rand::thread_rng().gen_range(0..=(delay - half).as_millis() as u64);
            half + Duration::from_millis(spread)
        } else {
            delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_limits(&ChannelLimits::with_rate(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
            jitter,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(false);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_millis(1000));
        assert_eq!(p.delay_for(60), Duration::from_millis(1000));
        assert_eq!(p.max_attempts(), 4);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = policy(true);
        for retry in 0..6 {
            let full = policy(false).delay_for(retry);
            for _ in 0..50 {
                let d = p.delay_for(retry);
                assert!(d >= full / 2 && d <= full, "retry {retry}: {d:?}");
            }
        }
    }
}
