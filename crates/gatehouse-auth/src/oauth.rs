//! OAuth2 authorization-code client.
//!
//! Builds the provider authorization URL for the login redirect and exchanges
//! the authorization code returned to the callback for an access token.

use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use url::Url;

use crate::config::OAuthClientConfig;
use crate::error::AuthError;

/// Token issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The access token.
    pub access_token: String,
    /// Token type as sent by the provider, possibly empty.
    pub token_type: String,
    /// Refresh token, present when offline access was granted.
    pub refresh_token: Option<String>,
    /// Absolute expiry computed from `expires_in`.
    pub expiry: Option<OffsetDateTime>,
}

impl Token {
    /// Returns the token type with the canonical casing of the well-known
    /// schemes; an empty type means `Bearer`.
    #[must_use]
    pub fn token_type(&self) -> &str {
        if self.token_type.eq_ignore_ascii_case("bearer") || self.token_type.is_empty() {
            "Bearer"
        } else if self.token_type.eq_ignore_ascii_case("mac") {
            "MAC"
        } else if self.token_type.eq_ignore_ascii_case("basic") {
            "Basic"
        } else {
            &self.token_type
        }
    }

    /// Value stored in the session cookie: `"<token type> <access token>"`.
    #[must_use]
    pub fn session_value(&self) -> String {
        format!("{} {}", self.token_type(), self.access_token)
    }
}

/// Token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    /// Parses a form-encoded response, as sent by some older providers.
    fn from_form(body: &[u8]) -> Self {
        let mut response = Self {
            access_token: String::new(),
            token_type: String::new(),
            refresh_token: None,
            expires_in: None,
        };
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "access_token" => response.access_token = value.into_owned(),
                "token_type" => response.token_type = value.into_owned(),
                "refresh_token" => response.refresh_token = Some(value.into_owned()),
                "expires_in" => response.expires_in = Some(value.into_owned().into()),
                _ => {}
            }
        }
        response
    }

    fn expires_in_secs(&self) -> Option<i64> {
        let secs = match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        };
        secs.filter(|secs| *secs > 0)
    }

    fn into_token(self, now: OffsetDateTime) -> Result<Token, AuthError> {
        if self.access_token.is_empty() {
            return Err(AuthError::token_exchange(
                "server response missing access_token",
            ));
        }
        let expiry = self
            .expires_in_secs()
            .map(|secs| now + time::Duration::seconds(secs));
        Ok(Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expiry,
        })
    }
}

/// OAuth2 error response (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for the identity provider's authorization and token endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthClientConfig,
    auth_url: Url,
    token_url: Url,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client for the configured provider.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if an endpoint is not a valid URL or
    /// the HTTP client cannot be built.
    pub fn new(config: OAuthClientConfig, request_timeout: Duration) -> Result<Self, AuthError> {
        let auth_url = Url::parse(&config.auth_url)
            .map_err(|e| AuthError::configuration(format!("auth_url: {e}")))?;
        let token_url = Url::parse(&config.token_url)
            .map_err(|e| AuthError::configuration(format!("token_url: {e}")))?;
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("http client: {e}")))?;

        Ok(Self {
            config,
            auth_url,
            token_url,
            http_client,
        })
    }

    /// Builds the authorization URL the browser is redirected to, requesting
    /// offline access so the provider may issue a refresh token.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.auth_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("access_type", "offline");
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("redirect_uri", &self.config.redirect_url);
            params.append_pair("response_type", "code");
            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
            params.append_pair("state", state);
        }
        url
    }

    /// Exchanges an authorization code for a token.
    pub async fn exchange(&self, code: &str) -> Result<Token, AuthError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if !self.config.client_secret.is_empty() {
            params.push(("client_secret", self.config.client_secret.as_str()));
        }

        tracing::debug!(token_url = %self.token_url, "exchanging authorization code");

        let response = self
            .http_client
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let is_form = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| {
                ct.starts_with("application/x-www-form-urlencoded") || ct.starts_with("text/plain")
            });
        let body = response.bytes().await?;

        if !status.is_success() {
            if let Ok(oauth_error) = serde_json::from_slice::<OAuthErrorResponse>(&body) {
                return Err(AuthError::identity_provider(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }
            return Err(AuthError::token_exchange(format!(
                "HTTP {} - {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        let token_response = if is_form {
            TokenResponse::from_form(&body)
        } else {
            serde_json::from_slice::<TokenResponse>(&body).map_err(|e| {
                AuthError::token_exchange(format!("Failed to parse token response: {e}"))
            })?
        };

        token_response.into_token(OffsetDateTime::now_utc())
    }
}
