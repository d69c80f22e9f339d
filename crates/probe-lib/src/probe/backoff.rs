use std::time::Duration;

/// Bounds for the retry delay after transport failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure (default: 500ms)
    pub min: Duration,
    /// Ceiling for the delay (default: 30 seconds)
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff: `min`, doubling per consecutive failure, capped at
/// `max`, back to `min` after `reset`
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.consecutive_failures.min(31);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        let delay = self
            .config
            .min
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.config.max);
        delay.min(self.config.max).max(self.config.min.min(self.config.max))
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(min_ms: u64, max_ms: u64) -> Backoff {
        Backoff::new(BackoffConfig {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        })
    }

    #[test]
    fn test_doubles_from_min() {
        let mut backoff = backoff(500, 30_000);
        let delays: Vec<u128> = (0..4).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
        assert_eq!(backoff.consecutive_failures(), 4);
    }

    #[test]
    fn test_non_decreasing_and_capped() {
        let mut backoff = backoff(500, 30_000);
        let mut previous = Duration::ZERO;
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(30));
    }

    #[test]
    fn test_reset_returns_to_min() {
        let mut backoff = backoff(100, 1_000);
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();

        assert_eq!(backoff.consecutive_failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_min_above_max_uses_max() {
        let mut backoff = backoff(5_000, 1_000);
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
    }
}
