//! Retry decorator — wraps any provider with exponential back-off.
//!
//! Retry policy deliberately lives at the provider layer, not in the
//! scheduler: the engine treats a node's apply call as a single operation
//! that either succeeds or fails. Wrap a provider in `RetryProvider` to
//! re-issue `Retryable` failures; `Fatal` failures pass straight through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{ApplyRequest, Outputs, Provider, ProviderError};

/// A provider decorator that retries `Retryable` errors.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    /// Maximum number of times a retryable failure will be retried.
    max_retries: u32,
    /// Base delay for exponential back-off between retries.
    base_delay: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, max_retries: u32, base_delay: Duration) -> Self {
        Self { inner, max_retries, base_delay }
    }

    /// Wrap with defaults: 3 retries, 100ms base delay.
    pub fn with_defaults(inner: Arc<dyn Provider>) -> Self {
        Self::new(inner, 3, Duration::from_millis(100))
    }
}

#[async_trait]
impl Provider for RetryProvider {
    async fn apply(&self, request: ApplyRequest) -> Result<Outputs, ProviderError> {
        let mut attempts = 0u32;

        loop {
            match self.inner.apply(request.clone()).await {
                Ok(outputs) => return Ok(outputs),

                Err(ProviderError::Fatal(msg)) => return Err(ProviderError::Fatal(msg)),

                Err(ProviderError::Retryable(msg)) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        return Err(ProviderError::Retryable(format!(
                            "retry limit exceeded after {attempts} attempts: {msg}"
                        )));
                    }

                    let delay = self.base_delay * 2u32.pow(attempts.saturating_sub(1));

                    warn!(
                        "resource '{}' retryable error (attempt {}/{}), retrying in {:?}: {}",
                        request.name, attempts, self.max_retries, delay, msg
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
