use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::{FailureKind, ProviderError};

/// Which failure kinds are worth another attempt. Unauthorized and rejected
/// requests never are: the same request would fail the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOn {
    pub rate_limited: bool,
    pub server_errors: bool,
    pub transport: bool,
}

impl Default for RetryOn {
    fn default() -> Self {
        Self {
            rate_limited: true,
            server_errors: true,
            transport: true,
        }
    }
}

impl RetryOn {
    pub fn allows(&self, kind: FailureKind) -> bool {
        match kind {
            FailureKind::RateLimited => self.rate_limited,
            FailureKind::ServerError => self.server_errors,
            FailureKind::Transport => self.transport,
            FailureKind::Unauthorized | FailureKind::Rejected | FailureKind::InvalidPayload => {
                false
            }
        }
    }
}

/// Bounded exponential backoff shared by every network-calling component.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
    pub retry_on: RetryOn,
}

#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: ProviderError,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            retry_on: RetryOn::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            ..Self::default()
        }
    }

    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }

    pub fn should_retry(&self, err: &ProviderError, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1) && self.retry_on.allows(err.kind())
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error or the
    /// attempt cap is reached. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Result<T, ProviderError>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.should_retry(&err, attempt) {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.backoff_after(attempt);
                    warn!(
                        "{label}: attempt {attempt}/{} failed ({err}); retrying in {:.1}s",
                        self.max_attempts,
                        delay.as_secs_f64()
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{RetryOn, RetryPolicy};
    use crate::error::ProviderError;

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimited {
            provider: "Tavily".to_string(),
            status: 429,
            body: String::new(),
        }
    }

    fn unauthorized() -> ProviderError {
        ProviderError::Unauthorized {
            provider: "Tavily".to_string(),
            status: 401,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut policy = RetryPolicy::new(5, Duration::from_millis(100));
        policy.max_backoff = Duration::from_millis(300);
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_after(9), Duration::from_millis(300));
    }

    #[test]
    fn retries_transient_errors_until_success() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let mut calls = 0;
        let value = policy
            .run("search", |attempt| {
                calls += 1;
                if attempt < 3 {
                    Err(rate_limited())
                } else {
                    Ok(attempt)
                }
            })
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhaustion_reports_attempts_and_last_error() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run::<(), _>("search", |_| Err(rate_limited()))
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last.status(), Some(429));
    }

    #[test]
    fn unauthorized_is_never_retried() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let mut calls = 0;
        let err = policy
            .run::<(), _>("search", |_| {
                calls += 1;
                Err(unauthorized())
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert_eq!(err.attempts, 1);
    }

    #[test]
    fn retry_on_can_disable_rate_limit_retries() {
        let policy = RetryPolicy::new(4, Duration::ZERO).with_retry_on(RetryOn {
            rate_limited: false,
            ..RetryOn::default()
        });
        let err = policy
            .run::<(), _>("generate", |_| Err(rate_limited()))
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
