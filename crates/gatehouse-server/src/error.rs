//! Proxy and cache error types.

use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// An error that knows which HTTP status it must be reported with.
///
/// Anything in the proxy pipeline may return one, directly or wrapped in
/// context; the proxy searches the whole error chain for it and replies with
/// the carried status instead of `500`.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StatusError {
    status: StatusCode,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl StatusError {
    pub fn new(status: StatusCode, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            status,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Finds the first [`StatusError`] anywhere in `err`'s chain.
pub fn find_status_error(err: &anyhow::Error) -> Option<&StatusError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<StatusError>())
}

/// Errors raised while forwarding a request upstream.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// A request modifier rejected the outbound request.
    #[error("request modifier failed: {0:#}")]
    Modifier(anyhow::Error),

    /// The upstream exchange failed.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream did not produce response headers in time.
    #[error("upstream did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

impl ProxyError {
    pub fn status_error(&self) -> Option<&StatusError> {
        match self {
            Self::Modifier(err) => find_status_error(err),
            _ => None,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self.status_error() {
            Some(status_error) => {
                tracing::warn!(status = %status_error.status(), error = %self, "proxy request rejected");
                (status_error.status(), status_error.to_string()).into_response()
            }
            None => {
                tracing::error!(error = %self, "proxy request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream request failed",
                )
                    .into_response()
            }
        }
    }
}
