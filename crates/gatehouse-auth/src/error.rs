//! Session gateway error types.
//!
//! Every failure of the login flow is a client error: the flow is aborted
//! with `400 Bad Request` and no cookie is touched. Session inspection
//! failures map to `401 Unauthorized`. Responses carry only the status
//! reason phrase; the details go to the log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Errors that can occur while driving the OAuth2 session flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or carries a malformed one.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The identity provider reported an error, either through the callback
    /// parameters or from the token endpoint.
    #[error("{error} : {description}")]
    IdentityProvider {
        /// OAuth2 error code (`access_denied`, `invalid_grant`, ...).
        error: String,
        /// Human readable description supplied by the provider.
        description: String,
    },

    /// The state cookie is missing or cannot be decoded.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid.
        message: String,
    },

    /// The `state` parameter does not match the state cookie.
    #[error("Invalid state: callback state does not match the login state")]
    StateMismatch,

    /// The state was issued longer ago than the configured state lifetime.
    #[error("Invalid state: issued {age_secs}s ago")]
    StateExpired {
        /// Age of the state in seconds.
        age_secs: i64,
    },

    /// The redirect target is not a same-origin relative reference.
    #[error("Invalid redirect: {target}")]
    InvalidRedirect {
        /// The rejected redirect target.
        target: String,
    },

    /// Exchanging the authorization code failed.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Description of the failure.
        message: String,
    },

    /// The session cookie is missing or cannot be inspected.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The gateway configuration is unusable.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `IdentityProvider` error.
    #[must_use]
    pub fn identity_provider(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::IdentityProvider {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a new `InvalidState` error.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRedirect` error.
    #[must_use]
    pub fn invalid_redirect(target: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            target: target.into(),
        }
    }

    /// Creates a new `TokenExchange` error.
    #[must_use]
    pub fn token_exchange(message: impl Into<String>) -> Self {
        Self::TokenExchange {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        Self::token_exchange(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Unauthorized { .. } => tracing::debug!(error = %self, "session rejected"),
            Self::Configuration { .. } => tracing::error!(error = %self, "auth misconfigured"),
            _ => tracing::error!(error = %self, "auth flow aborted"),
        }

        let message = status.canonical_reason().unwrap_or("Error");
        (status, message).into_response()
    }
}
