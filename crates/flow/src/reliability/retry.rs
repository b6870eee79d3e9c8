//! Retry policy implementation

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from constructing a retry policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryPolicyError {
    #[error("retry interval must be positive")]
    NonPositiveInterval,

    #[error("maximum interval {max:?} is shorter than minimum interval {min:?}")]
    InvertedBounds { min: Duration, max: Duration },

    #[error("maximum attempts must be at least 1")]
    NonPositiveAttempts,
}

/// Maps an attempt number to the wait before the next attempt
///
/// `attempt` is 1-based: `delay(1)` is the wait after the first failure.
/// `None` means no further attempts. Implementations must be pure.
pub trait RetryPolicy: Send + Sync + 'static {
    fn delay(&self, attempt: u32) -> Option<Duration>;
}

/// Never retries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Fixed wait between attempts
///
/// # Example
///
/// ```
/// use everruns_flow::{ConstantTimeRetryPolicy, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = ConstantTimeRetryPolicy::new(Duration::from_secs(15), None).unwrap();
/// assert_eq!(policy.delay(1), Some(Duration::from_secs(15)));
/// assert_eq!(policy.delay(100), Some(Duration::from_secs(15)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantTimeRetryPolicy {
    #[serde(with = "duration_millis")]
    wait: Duration,

    /// `None` retries forever
    max_attempts: Option<u32>,
}

impl ConstantTimeRetryPolicy {
    pub fn new(wait: Duration, max_attempts: Option<u32>) -> Result<Self, RetryPolicyError> {
        if wait.is_zero() {
            return Err(RetryPolicyError::NonPositiveInterval);
        }
        if max_attempts == Some(0) {
            return Err(RetryPolicyError::NonPositiveAttempts);
        }
        Ok(Self { wait, max_attempts })
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl RetryPolicy for ConstantTimeRetryPolicy {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if exceeds(attempt, self.max_attempts) {
            return None;
        }
        Some(self.wait)
    }
}

/// Doubling wait from a base up to a ceiling
///
/// `delay(n) = min(max, min_interval * (2^n - 1))`, so with a 5 s base the
/// waits run 5 s, 15 s, 35 s, ... until the ceiling.
///
/// # Example
///
/// ```
/// use everruns_flow::{ExponentialRetryPolicy, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = ExponentialRetryPolicy::new(
///     Duration::from_secs(5),
///     Duration::from_secs(3600),
///     Some(10),
/// )
/// .unwrap();
///
/// assert_eq!(policy.delay(2), Some(Duration::from_secs(15)));
/// assert_eq!(policy.delay(10), Some(Duration::from_secs(3600)));
/// assert_eq!(policy.delay(11), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExponentialRetryPolicy {
    #[serde(with = "duration_millis")]
    min_interval: Duration,

    #[serde(with = "duration_millis")]
    max_interval: Duration,

    max_attempts: Option<u32>,
}

impl ExponentialRetryPolicy {
    pub fn new(
        min_interval: Duration,
        max_interval: Duration,
        max_attempts: Option<u32>,
    ) -> Result<Self, RetryPolicyError> {
        if min_interval.is_zero() {
            return Err(RetryPolicyError::NonPositiveInterval);
        }
        if max_interval < min_interval {
            return Err(RetryPolicyError::InvertedBounds {
                min: min_interval,
                max: max_interval,
            });
        }
        if max_attempts == Some(0) {
            return Err(RetryPolicyError::NonPositiveAttempts);
        }
        Ok(Self {
            min_interval,
            max_interval,
            max_attempts,
        })
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || exceeds(attempt, self.max_attempts) {
            return None;
        }

        // 2^n - 1, saturating
        let factor = 1u32
            .checked_shl(attempt)
            .map(|power| power - 1)
            .unwrap_or(u32::MAX);

        let delay = self
            .min_interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval);
        Some(delay.min(self.max_interval))
    }
}

fn exceeds(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.is_some_and(|max| attempt > max)
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
