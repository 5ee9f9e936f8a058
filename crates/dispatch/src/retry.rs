//! Bounded retry for handler invocations.

use std::future::Future;
use std::time::Duration;

use crate::error::HandlerError;

/// Invokes handlers with a bounded number of attempts.
///
/// Business errors are final and returned immediately; transient errors
/// are retried after a fixed delay until the attempt budget is spent.
/// The closure is called once per attempt so the caller can build fresh
/// state (a new command context, for instance) for every try.
#[derive(Debug, Clone)]
pub struct RetryInvoker {
    max_attempts: u32,
    delay: Duration,
}

impl RetryInvoker {
    /// Creates an invoker with the given attempt budget and inter-attempt
    /// delay. The budget is clamped to at least one attempt.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs one attempt-producing closure until it succeeds, fails with a
    /// business error, or exhausts the budget.
    pub async fn invoke<T, F, Fut>(&self, target: &str, mut attempt: F) -> Result<T, HandlerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HandlerError>>,
    {
        let mut last_error = None;
        for n in 1..=self.max_attempts {
            match attempt().await {
                Ok(value) => {
                    tracing::debug!(target_name = target, attempt = n, "invocation succeeded");
                    return Ok(value);
                }
                Err(err @ HandlerError::Business { .. }) => return Err(err),
                Err(err @ HandlerError::Transient { .. }) => {
                    if n < self.max_attempts {
                        tracing::warn!(
                            target_name = target,
                            attempt = n,
                            error = %err,
                            "transient failure, retrying"
                        );
                        metrics::counter!("handler_retries_total").increment(1);
                        tokio::time::sleep(self.delay).await;
                    } else {
                        tracing::error!(
                            target_name = target,
                            attempts = n,
                            error = %err,
                            "transient failure, attempts exhausted"
                        );
                    }
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| HandlerError::transient("no attempt was made")))
    }
}

impl Default for RetryInvoker {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(1000))
    }
}
