use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule for failed jobs.
///
/// The delay before attempt `n + 1` is `base_delay * 2^n`, capped at
/// `max_delay`. An optional jitter fraction spreads retries out to avoid
/// thundering herds when many jobs fail at once.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Backoff for the first retry, before doubling.
    base_delay: Duration,
    /// Upper bound on any computed delay.
    max_delay: Duration,
    /// Jitter fraction in `[0, 1]`; `0` disables jitter.
    jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Whether a job with `attempts` completed attempts may still be retried.
    pub fn should_retry(&self, attempts: u32, max_retries: u32) -> bool {
        attempts < max_retries
    }

    /// Delay to wait after the given completed attempt number (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);

        if self.jitter > 0.0 {
            self.apply_jitter(capped)
        } else {
            capped
        }
    }

    // Additive perturbation in [-jitter * delay, +jitter * delay], never below
    // one second.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        let range = delay.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-range..=range);
        let jittered = delay.as_secs_f64() + offset;
        Duration::from_secs_f64(jittered.max(1.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(3600), 0.0);

        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 0.0);

        assert_eq!(policy.delay(20), Duration::from_secs(300));
        // Large attempt counts must not overflow.
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0, 3));
        assert!(policy.should_retry(2, 3));
        assert!(!policy.should_retry(3, 3));
        assert!(!policy.should_retry(0, 0));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(Duration::from_secs(100), Duration::from_secs(3600), 0.2);

        for _ in 0..100 {
            let d = policy.delay(1).as_secs_f64();
            assert!((160.0..=240.0).contains(&d), "delay {d} out of band");
        }
    }

    #[test]
    fn test_jitter_floor_is_one_second() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300), 1.0);

        for _ in 0..100 {
            assert!(policy.delay(0) >= Duration::from_secs(1));
        }
    }
}
