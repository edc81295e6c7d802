//! Bounded polling for readiness conditions.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::FetchFailure;

/// Shortest poll interval accepted; anything lower is clamped.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls a predicate until it holds or a timeout elapses.
///
/// Expiry yields a [`FailureKind::Timeout`](crate::FailureKind::Timeout)
/// failure, which the default retry policy treats as retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCondition {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for WaitCondition {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), poll_interval: Duration::from_millis(500) }
    }
}

impl WaitCondition {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self { timeout, poll_interval: poll_interval.max(MIN_POLL_INTERVAL) }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Copy whose timeout does not extend past `deadline`.
    pub fn bounded_by(&self, deadline: Option<Instant>) -> Self {
        match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Self { timeout: self.timeout.min(remaining), ..*self }
            }
            None => *self,
        }
    }

    /// Evaluate `predicate` every poll interval until it returns `Ok(true)`.
    ///
    /// Transient predicate errors count as "not yet"; any other error aborts
    /// the wait immediately. `label` names the condition in timeout messages.
    pub async fn wait_for<P, Fut>(&self, label: &str, predicate: P) -> Result<(), FetchFailure>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, FetchFailure>>,
    {
        self.wait_for_until(label, predicate, None).await
    }

    /// Like [`wait_for`](Self::wait_for), also bounded by `deadline`.
    pub async fn wait_for_until<P, Fut>(
        &self, label: &str, mut predicate: P, deadline: Option<Instant>,
    ) -> Result<(), FetchFailure>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, FetchFailure>>,
    {
        let started = Instant::now();
        let mut end = started + self.timeout;
        if let Some(deadline) = deadline {
            end = end.min(deadline);
        }

        let mut polls: u32 = 0;
        let mut last_error: Option<FetchFailure> = None;

        loop {
            polls += 1;
            match tokio::time::timeout_at(end, predicate()).await {
                Ok(Ok(true)) => {
                    tracing::debug!(label, polls, "condition met");
                    return Ok(());
                }
                Ok(Ok(false)) => {}
                Ok(Err(e)) if e.is_transient() => last_error = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= end {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(end - now)).await;
        }

        let waited = Instant::now() - started;
        tracing::debug!(label, polls, waited_ms = waited.as_millis() as u64, "condition timed out");
        let message = match last_error {
            Some(e) => format!("timed out after {}ms waiting for {label} (last error: {e})", waited.as_millis()),
            None => format!("timed out after {}ms waiting for {label}", waited.as_millis()),
        };
        Err(FetchFailure::timeout(message))
    }
}
