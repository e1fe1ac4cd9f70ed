use std::time::Duration;

use reqwest::{header::RETRY_AFTER, Response};

/// How a sink retries throttled or failing calls: exponential delays from `initial_delay`,
/// growing by `multiplier` per attempt and capped at `max_delay`, for at most `max_retries`
/// retries after the first call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
            max_retries,
        }
    }

    /// Retries immediately. Meant for tests.
    pub const fn immediate(max_retries: u32) -> Self {
        Self::new(Duration::ZERO, 1.0, Duration::ZERO, max_retries)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }

    /// Delay before retry number `attempt` (0-based). A server-provided `Retry-After` wins
    /// over the computed delay, still capped at `max_delay`.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(requested) = retry_after {
            return requested.min(self.max_delay);
        }
        let pow = self.multiplier.powi(attempt as i32);
        let scaled = if pow.is_finite() {
            self.initial_delay.mul_f64(pow)
        } else {
            self.max_delay
        };
        scaled.min(self.max_delay)
    }
}

/// Seconds form of `Retry-After` only; HTTP dates are ignored.
pub fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_progression_and_cap() {
        let p = RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 5);

        let cases = vec![(0, 1), (1, 2), (2, 4), (3, 8), (4, 16), (5, 30), (20, 30)];
        for (attempt, expected_secs) in cases {
            assert_eq!(p.delay(attempt, None).as_secs(), expected_secs, "attempt {attempt}");
        }
    }

    #[test]
    fn test_retry_after_overrides_and_is_capped() {
        let p = RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(30), 5);

        assert_eq!(p.delay(0, Some(Duration::from_secs(7))), Duration::from_secs(7));
        assert_eq!(p.delay(0, Some(Duration::from_secs(600))), Duration::from_secs(30));
    }

    #[test]
    fn test_exhausted() {
        let p = RetryPolicy::immediate(2);
        assert!(!p.exhausted(1));
        assert!(p.exhausted(2));
        assert_eq!(p.delay(3, None), Duration::ZERO);
    }
}
