use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for transient API failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy
{
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay:   Duration,
    pub multiplier:   f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter:       bool,
}

impl Default for RetryPolicy
{
    fn default() -> Self {
        RetryPolicy { max_attempts: 3, base_delay: Duration::from_secs(1), multiplier: 2.0, jitter: true }
    }
}

impl RetryPolicy
{
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64) -> RetryPolicy
    {
        RetryPolicy { max_attempts: max_attempts.max(1), base_delay, multiplier, jitter: false }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration
    {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.base_delay.mul_f64(self.multiplier.max(1.0).powi(exponent));
        if self.jitter
        {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        }
        else
        {
            delay
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool
    {
        attempt < self.max_attempts
    }
}

#[test]
fn test_delay()
{
    let policy = RetryPolicy::new(3, Duration::from_millis(100), 2.0);
    assert_eq!(policy.delay(1), Duration::from_millis(100));
    assert_eq!(policy.delay(2), Duration::from_millis(200));
    assert_eq!(policy.delay(3), Duration::from_millis(400));
    assert!(policy.should_retry(2));
    assert!(!policy.should_retry(3));
}

#[test]
fn test_jitter_bounds()
{
    let policy = RetryPolicy { jitter: true, ..RetryPolicy::new(5, Duration::from_secs(4), 2.0) };
    for _ in 0..32
    {
        let delay = policy.delay(2);
        assert!(delay >= Duration::from_secs(4) && delay <= Duration::from_secs(8), "{:?}", delay);
    }
}
