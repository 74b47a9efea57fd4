use std::time::Duration;

/// Maximum number of startup connection attempts.
pub const STARTUP_MAX_ATTEMPTS: u32 = 10;
/// Delay between startup connection attempts.
pub const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Bounded retry budget for broker connections: a fixed number of attempts
/// separated by a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryPolicy {
    /// Startup policy: 10 attempts, 5 seconds apart.
    #[must_use]
    pub fn startup() -> Self {
        Self::fixed(STARTUP_MAX_ATTEMPTS, STARTUP_RETRY_DELAY)
    }

    /// A single attempt. Used per request by the producer.
    #[must_use]
    pub fn single_attempt() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    #[must_use]
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Whether another attempt may follow the given failed attempt (1-based).
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
