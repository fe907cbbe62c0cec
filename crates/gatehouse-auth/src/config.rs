//! Session gateway configuration.
//!
//! This module provides the configuration types for the OAuth2 login flow:
//! the identity provider endpoints and client credentials, cookie names,
//! and the lifetime of the CSRF state token.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root configuration of the session gateway.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// auth_cookie_name = "auth"
/// state_ttl = "1h"
///
/// [auth.oauth]
/// auth_url = "https://idp.example.com/oauth2/authorize"
/// token_url = "https://idp.example.com/oauth2/token"
/// client_id = "gatehouse"
/// client_secret = "secret"
/// redirect_url = "https://app.example.com/auth/callback"
/// scopes = ["openid", "profile"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Identity provider client configuration.
    pub oauth: OAuthClientConfig,

    /// Name of the cookie holding `"<token type> <access token>"`.
    pub auth_cookie_name: String,

    /// Name of the cookie holding the encoded login state.
    pub state_cookie_name: String,

    /// Lifetime of the state cookie. A callback carrying an older state
    /// is rejected even if the browser still presents the cookie.
    #[serde(with = "humantime_serde")]
    pub state_ttl: Duration,

    /// Timeout for requests to the token endpoint.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oauth: OAuthClientConfig::default(),
            auth_cookie_name: "auth".to_string(),
            state_cookie_name: "state".to_string(),
            state_ttl: Duration::from_secs(3600), // 1 hour
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// OAuth2 client registration at the identity provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    /// Authorization endpoint the browser is redirected to on login.
    pub auth_url: String,

    /// Token endpoint used to exchange the authorization code.
    pub token_url: String,

    /// Client identifier registered at the provider.
    pub client_id: String,

    /// Client secret registered at the provider.
    pub client_secret: String,

    /// Callback URL registered at the provider (points at `/auth/callback`).
    pub redirect_url: String,

    /// Requested scopes.
    pub scopes: Vec<String>,
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if a provider endpoint or the client id is
    /// empty, and `ConfigError::InvalidValue` if an endpoint is not an absolute
    /// URL, a cookie name is empty, or the two cookie names collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("auth.oauth.auth_url", &self.oauth.auth_url),
            ("auth.oauth.token_url", &self.oauth.token_url),
            ("auth.oauth.redirect_url", &self.oauth.redirect_url),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Missing(name.to_string()));
            }
            Url::parse(value)
                .map_err(|e| ConfigError::InvalidValue(format!("{name} '{value}': {e}")))?;
        }

        if self.oauth.client_id.is_empty() {
            return Err(ConfigError::Missing("auth.oauth.client_id".to_string()));
        }

        if self.auth_cookie_name.is_empty() || self.state_cookie_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "cookie names cannot be empty".to_string(),
            ));
        }

        if self.auth_cookie_name == self.state_cookie_name {
            return Err(ConfigError::InvalidValue(format!(
                "auth and state cookies share the name '{}'",
                self.auth_cookie_name
            )));
        }

        if self.state_ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "state_ttl must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
