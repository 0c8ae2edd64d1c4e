//! Provider-level error type.

use thiserror::Error;

/// Errors returned by a provider's `apply` method.
///
/// Callers use the variant to decide retry behaviour:
/// - `Retryable` — the call may be re-issued with back-off (see `RetryProvider`).
/// - `Fatal`     — no retry should be attempted; the resource is marked failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient failure; the call may be retried.
    #[error("retryable provider error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}
