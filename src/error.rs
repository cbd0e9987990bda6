//! Error types for API access.

use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by [`crate::client::ApiClient`].
///
/// An unmatched command is not represented here; the resolver reports that
/// as `None`.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The server answered with a non-success status and an error body.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        /// Game-specific error code from the body, `0` when absent.
        code: i64,
        message: String,
    },

    /// The request never produced a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Every retry after a rate-limit wait failed. Carries the last failure.
    #[error("rate limit retries exhausted after {attempts} attempts: {source}")]
    RateLimitExhausted { attempts: u32, source: TransportError },

    /// The caller cancelled while a request was waiting or retrying.
    #[error("request aborted")]
    Aborted,
}

impl ApiError {
    pub fn api(status: u16, code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// True for a 429 reply or an exhausted rate-limit retry loop.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Api { status: 429, .. } | Self::RateLimitExhausted { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
