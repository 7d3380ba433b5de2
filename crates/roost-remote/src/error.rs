//! Error types for remote-data operations.

use thiserror::Error;

use crate::retry::{RetryError, Retryable};

/// Errors returned by a remote row fetch.
///
/// Cloneable so every caller collapsed into one single-flight fetch can
/// receive the same failure the leader saw.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The remote API rejected the call for exceeding its rate limit.
    #[error("rate limited by remote API")]
    RateLimited {
        /// Server-suggested wait before retrying, when provided.
        retry_after_secs: Option<u64>,
    },

    /// The remote API answered with a failure status.
    #[error("remote API returned status {0}")]
    Upstream(u16),

    /// The call did not complete within its deadline.
    #[error("remote call timed out")]
    Timeout,

    /// The request never reached the remote API.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The response could not be interpreted as rows.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether a retry could plausibly succeed.
    ///
    /// Rate limits, 5xx statuses, timeouts, and transport failures are
    /// transient; authentication and malformed-response failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Transport(_) => true,
            Self::Upstream(status) => *status >= 500,
            Self::Auth(_) | Self::Malformed(_) => false,
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        FetchError::is_transient(self)
    }
}

/// Errors surfaced to cache callers.
///
/// A failed refresh with a prior snapshot degrades to stale-serving and is
/// only logged; these variants cover the cases with nothing to fall back on.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// No snapshot exists for the dataset and the initial fetch failed.
    #[error("no cached rows for dataset '{key}': {source}")]
    ColdStart {
        /// Dataset key that was requested.
        key: String,
        /// Outcome of the failed fetch.
        #[source]
        source: RetryError<FetchError>,
    },

    /// The in-flight refresh this caller was waiting on was dropped before
    /// completing.
    #[error("refresh for dataset '{key}' was interrupted")]
    Interrupted {
        /// Dataset key that was requested.
        key: String,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment value could not be parsed or failed validation.
    #[error("configuration error: {0}")]
    Invalid(String),
}
