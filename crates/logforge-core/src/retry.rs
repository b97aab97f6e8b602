//! Backoff policy for failed chain requests and failed ranges.
//!
//! One policy answers both questions a caller has after a failure: is this
//! error worth retrying at all, and how long to pause before the next try.
//! Classification comes from [`IndexError`]; the delay grows geometrically
//! and is spread by jitter so several chains backing off against the same
//! node do not retry in lockstep.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::IndexError;

/// Capped exponential backoff with jittered delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_retries: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap on the grown delay, before jitter.
    pub max_delay: Duration,
    /// Geometric growth factor per retry.
    pub growth: f64,
    /// Width of the jitter band as a fraction of the delay: the final delay
    /// lands uniformly in `delay * (1 ± jitter / 2)`. Zero disables jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            growth: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Decide what to do about a failure. `attempt` counts failures so far,
    /// starting at 1. Returns the pause before the next try, or `None` when
    /// the error is not retryable or the retry budget ran out.
    pub fn backoff_for(&self, error: &IndexError, attempt: u32) -> Option<Duration> {
        if !error.is_retryable() || attempt > self.max_retries {
            return None;
        }
        Some(self.delay_for(attempt))
    }

    /// The jittered delay after `attempt` failures. Attempts beyond
    /// `max_retries` are clamped to the last step, so callers with their own
    /// failure budget (the sync loop's dispatch retry budget) can keep
    /// asking without the delay resetting or overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let step = attempt.clamp(1, self.max_retries.max(1)) - 1;
        let grown = self.base_delay.as_secs_f64() * self.growth.powi(step as i32);
        let capped = grown.min(self.max_delay.as_secs_f64());
        let spread = 1.0 + self.jitter * (jitter_unit() - 0.5);
        Duration::from_secs_f64(capped * spread)
    }
}

/// Uniform-ish value in `[0, 1)` from the clock's sub-second noise — enough
/// to decorrelate retries without carrying an RNG dependency.
fn jitter_unit() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos()) as f64
        / 1e9
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            growth: 2.0,
            jitter,
        }
    }

    #[test]
    fn delays_grow_to_the_cap() {
        let p = policy(0.0);
        assert_eq!(p.delay_for(1).as_millis(), 100);
        assert_eq!(p.delay_for(2).as_millis(), 200);
        assert_eq!(p.delay_for(3).as_millis(), 300);
        // Clamped past the budget instead of growing further.
        assert_eq!(p.delay_for(10).as_millis(), 300);
    }

    #[test]
    fn jitter_stays_inside_the_band() {
        let p = policy(0.4);
        for _ in 0..64 {
            let d = p.delay_for(1);
            assert!(
                d >= Duration::from_millis(80) && d <= Duration::from_millis(120),
                "delay {d:?} outside 100ms +/- 20%"
            );
        }
    }

    #[test]
    fn fatal_errors_never_back_off() {
        let p = policy(0.0);
        let deep = IndexError::DeepReorg {
            chain_id: 1,
            depth: 70,
            max_depth: 64,
        };
        assert!(p.backoff_for(&deep, 1).is_none());
        assert!(p.backoff_for(&IndexError::Config("bad".into()), 1).is_none());
    }

    #[test]
    fn retryable_errors_back_off_until_the_budget_runs_out() {
        let p = policy(0.0);
        let down = IndexError::ChainUnavailable {
            chain_id: 1,
            reason: "timeout".into(),
        };
        assert_eq!(p.backoff_for(&down, 1), Some(Duration::from_millis(100)));
        assert_eq!(p.backoff_for(&down, 3), Some(Duration::from_millis(300)));
        assert!(p.backoff_for(&down, 4).is_none());
    }
}
