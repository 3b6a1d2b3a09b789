//! Retry policy and a generic retry-with-backoff helper.
//!
//! Errors describe themselves through [`ErrorClassification`]; the helper only
//! decides whether to try again and how long to wait. Waiting goes through a
//! [`Sleeper`] so the schedule can be checked without real delays.

use std::{fmt::Display, future::Future, time::Duration};

/// Classification of errors for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network trouble, timeouts, upstream 5xx.
    Transient,
    /// Upstream asked us to slow down.
    RateLimited,
    /// Retrying will not help.
    Permanent,
}

pub trait ErrorClassification {
    fn category(&self) -> ErrorCategory;
}

/// How long to wait before retry number `attempt` (1-based: the wait after the
/// first failed attempt is `delay(1)`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base + step * (attempt - 1)`
    Linear { base: Duration, step: Duration },
    /// `base * 2^(attempt - 1)`
    Exponential { base: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let n = attempt.saturating_sub(1);
        match *self {
            Backoff::Linear { base, step } => base + step * n,
            Backoff::Exponential { base } => base * 2u32.saturating_pow(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limited: Backoff,
    pub transient: Backoff,
}

impl RetryPolicy {
    /// 15s/25s/35s when throttled, 5s/10s/20s on network trouble.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            rate_limited: Backoff::Linear {
                base: Duration::from_secs(15),
                step: Duration::from_secs(10),
            },
            transient: Backoff::Exponential {
                base: Duration::from_secs(5),
            },
        }
    }

    fn delay_for(&self, category: ErrorCategory, attempt: u32) -> Option<Duration> {
        match category {
            ErrorCategory::RateLimited => Some(self.rate_limited.delay(attempt)),
            ErrorCategory::Transient => Some(self.transient.delay(attempt)),
            ErrorCategory::Permanent => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_max_attempts(3)
    }
}

/// Something that can wait.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> {
        (**self).sleep(duration)
    }
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not worth retrying.
    Permanent(E),
    /// Every attempt failed; `last` is the final error.
    Exhausted { attempts: u32, last: E },
}

/// Runs `operation` until it succeeds, fails permanently, or `max_attempts`
/// is used up. The operation receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: ErrorClassification + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: Sleeper,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = policy.delay_for(err.category(), attempt) else {
            return Err(RetryError::Permanent(err));
        };
        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        log::warn!(
            "attempt {}/{} failed: {}; retrying in {}s",
            attempt,
            max_attempts,
            err,
            delay.as_secs()
        );
        sleeper.sleep(delay).await;
        attempt += 1;
    }
}
