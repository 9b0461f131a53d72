use thiserror::Error;

/// Failures raised by the remote tracker client.
///
/// Only `RateLimited` is ever produced after automatic retries; every other
/// HTTP failure is surfaced on the first occurrence because write calls are
/// not known to be idempotent against this service.
#[derive(Debug, Error)]
pub enum TraktError {
    #[error("rate limited after retries, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("trakt returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("device authorization was denied or the code expired")]
    AuthorizationDenied,

    #[error("device authorization timed out")]
    AuthorizationTimeout,

    #[error("not authenticated with trakt, run login first")]
    NotAuthenticated,

    #[error("unexpected response: {0}")]
    Protocol(String),
}
