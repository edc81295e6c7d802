//! Bounded retry with exponential backoff.
//!
//! A failed attempt is retried only when its [`FailureKind`] is in the
//! policy's retryable set. Delays grow as `base_delay * backoff^n` where `n`
//! is the zero-based index of the retry. Optional jitter adds up to 25% of the
//! computed delay; without it, successive delays never decrease.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::CacheKey;
use crate::error::{Error, FailureKind, FetchFailure};

/// Upper bound for a single backoff sleep.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Fraction of the computed delay that jitter may add.
const JITTER_RATIO: f64 = 0.25;

/// How many times to attempt an operation and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: f64,
    pub retryable: BTreeSet<FailureKind>,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff: 2.0,
            retryable: FailureKind::ALL.into_iter().filter(|k| k.is_transient()).collect(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, ..Default::default() }
    }

    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = FailureKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        self.retryable.contains(&kind)
    }

    /// Delay before retry number `retry_index` (0 for the first retry), without jitter.
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let factor = self.backoff.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }

    fn sleep_for(&self, retry_index: u32) -> Duration {
        let delay = self.delay_for(retry_index);
        if self.jitter { delay + delay.mul_f64(fastrand::f64() * JITTER_RATIO) } else { delay }
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// The failure kind is not retryable; no further attempts were made.
    #[error("non-retryable failure on attempt {attempts}: {failure}")]
    NonRetryable { attempts: u32, failure: FetchFailure },

    /// Every allowed attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchFailure },

    /// The caller's deadline elapsed first.
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32, last: Option<FetchFailure> },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NonRetryable { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    pub fn last_failure(&self) -> Option<&FetchFailure> {
        match self {
            RetryError::NonRetryable { failure, .. } => Some(failure),
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::DeadlineExceeded { last, .. } => last.as_ref(),
        }
    }

    /// Attach the request's cache key.
    pub fn into_error(self, key: &CacheKey) -> Error {
        let key = key.to_string();
        match self {
            RetryError::NonRetryable { failure, .. } => Error::FetchFailed { key, failure },
            RetryError::Exhausted { attempts, last } => Error::RetriesExhausted { key, attempts, last },
            RetryError::DeadlineExceeded { attempts, last } => Error::DeadlineExceeded { key, attempts, last },
        }
    }
}

/// Runs fallible operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        self.execute_until(operation, None).await
    }

    /// Like [`execute`](Self::execute), bounded by an overall deadline.
    ///
    /// An attempt still running at the deadline is dropped, and no backoff
    /// sleep is started that would end past it.
    pub async fn execute_until<T, F, Fut>(&self, mut operation: F, deadline: Option<Instant>) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchFailure>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last: Option<FetchFailure> = None;

        for attempt in 1..=max_attempts {
            let outcome = match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(RetryError::DeadlineExceeded { attempts: attempt - 1, last });
                    }
                    match tokio::time::timeout_at(deadline, operation(attempt)).await {
                        Ok(outcome) => outcome,
                        Err(_) => return Err(RetryError::DeadlineExceeded { attempts: attempt, last }),
                    }
                }
                None => operation(attempt).await,
            };

            let failure = match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            tracing::warn!(attempt, max_attempts, kind = %failure.kind, "attempt failed: {}", failure.message);

            if !self.policy.is_retryable(failure.kind) {
                return Err(RetryError::NonRetryable { attempts: attempt, failure });
            }
            if attempt == max_attempts {
                return Err(RetryError::Exhausted { attempts: attempt, last: failure });
            }

            let delay = self.policy.sleep_for(attempt - 1);
            if let Some(deadline) = deadline
                && Instant::now() + delay >= deadline
            {
                return Err(RetryError::DeadlineExceeded { attempts: attempt, last: Some(failure) });
            }

            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
            last = Some(failure);
            tokio::time::sleep(delay).await;
        }

        // max_attempts >= 1, so the loop always returns.
        Err(RetryError::Exhausted {
            attempts: max_attempts,
            last: last.unwrap_or_else(|| FetchFailure::timeout("no attempt was made")),
        })
    }
}
