//! Inter-query pacing and navigation retry backoff.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::{RetryConfig, ThrottleConfig};

/// Enforces a minimum gap between queries, longer after a failure.
#[derive(Debug)]
pub struct Throttle {
    min_delay: Duration,
    failure_delay: Duration,
    jitter: Duration,
    last: Option<(Instant, bool)>,
}

impl Throttle {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            min_delay: Duration::from_millis(config.min_delay_ms),
            failure_delay: Duration::from_millis(config.failure_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            last: None,
        }
    }

    /// No pacing at all.
    pub fn disabled() -> Self {
        Self::new(&ThrottleConfig {
            min_delay_ms: 0,
            failure_delay_ms: 0,
            jitter_ms: 0,
        })
    }

    /// Required gap after a query with the given outcome, before jitter.
    pub fn base_delay(&self, failed: bool) -> Duration {
        if failed {
            self.failure_delay.max(self.min_delay)
        } else {
            self.min_delay
        }
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Sleep until the gap since the last recorded query has elapsed.
    pub async fn wait(&self) {
        let Some((at, failed)) = self.last else {
            return;
        };
        let gap = self.base_delay(failed) + self.jitter();
        let elapsed = at.elapsed();
        if gap > elapsed {
            let remaining = gap - elapsed;
            tracing::debug!(delay_ms = remaining.as_millis() as u64, failed, "throttling");
            tokio::time::sleep(remaining).await;
        }
    }

    /// Mark the end of a query that contacted the source.
    pub fn record(&mut self, failed: bool) {
        self.last = Some((Instant::now(), failed));
    }
}

/// Bounded attempts with doubling backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            base: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, after `attempt` failures (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(2u32.pow(exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(&RetryConfig {
            attempts: 4,
            base_backoff_ms: 500,
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::new(&RetryConfig {
            attempts: 0,
            base_backoff_ms: 1,
        });
        assert_eq!(policy.attempts, 1);
    }

    #[test]
    fn test_failure_delay_is_longer() {
        let throttle = Throttle::new(&ThrottleConfig {
            min_delay_ms: 100,
            failure_delay_ms: 400,
            jitter_ms: 0,
        });
        assert_eq!(throttle.base_delay(false), Duration::from_millis(100));
        assert_eq!(throttle.base_delay(true), Duration::from_millis(400));

        // A misconfigured failure delay never undercuts the minimum
        let throttle = Throttle::new(&ThrottleConfig {
            min_delay_ms: 300,
            failure_delay_ms: 50,
            jitter_ms: 0,
        });
        assert_eq!(throttle.base_delay(true), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_wait_enforces_gap() {
        let mut throttle = Throttle::new(&ThrottleConfig {
            min_delay_ms: 40,
            failure_delay_ms: 80,
            jitter_ms: 0,
        });
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() < Duration::from_millis(40));

        throttle.record(true);
        let start = Instant::now();
        throttle.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }
}
