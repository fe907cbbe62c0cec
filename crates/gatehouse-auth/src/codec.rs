//! Login state token encoding.
//!
//! The state token is base64 of JSON. It is not signed: it only binds a
//! callback to the login that issued it, and relies on the http-only,
//! path-scoped cookie and its short lifetime for integrity.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::AuthError;

/// State carried through the identity provider during login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Where the browser goes after a successful callback.
    #[serde(rename = "RedirectUri")]
    pub redirect_uri: String,

    /// Unix timestamp (seconds) of the login request.
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
}

impl SessionState {
    /// Creates a state for `redirect_uri` stamped with the current time.
    #[must_use]
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Encodes `value` as standard base64 of its JSON form.
pub fn encode<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(value)
        .map_err(|e| AuthError::invalid_state(format!("encode: {e}")))?;
    Ok(STANDARD.encode(json))
}

/// Decodes base64 JSON produced by [`encode`] or by a compact token segment.
///
/// Missing padding is restored and the url-safe alphabet is accepted, so the
/// payload segment of a JWT decodes as well as a state cookie does.
pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T, AuthError> {
    let mut normalized: String = encoded
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let rem = normalized.len() % 4;
    if rem > 0 {
        normalized.push_str(&"=".repeat(4 - rem));
    }

    let decoded = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| AuthError::invalid_state(format!("base64: {e}")))?;

    serde_json::from_slice(&decoded).map_err(|e| AuthError::invalid_state(format!("json: {e}")))
}
