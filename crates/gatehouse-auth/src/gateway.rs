//! OAuth2 session gateway.
//!
//! [`AuthGateway`] drives a browser session through
//! `anonymous → state issued → authenticated → anonymous`:
//!
//! - **login** stores an encoded [`SessionState`] in the state cookie and sends
//!   the browser to the identity provider
//! - **callback** checks the returned `state` against the cookie, exchanges the
//!   authorization code and stores `"<token type> <access token>"` in the
//!   session cookie
//! - **logout** expires the session cookie
//!
//! Every redirect target must be a same-origin relative reference. The
//! session cookie never reaches the upstream API as a cookie:
//! [`AuthGateway::modify_header`] moves it into the `Authorization` header.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE},
};
use axum_extra::extract::CookieJar;
use cookie::Cookie;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use crate::codec::{self, SessionState};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::OAuthClient;

/// Base that relative redirect targets are resolved against to detect an
/// authority component.
const REDIRECT_BASE: &str = "http://gatehouse.invalid/";

/// Query parameters of the provider callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,
    /// Echo of the state sent on login.
    #[serde(default)]
    pub state: Option<String>,
    /// OAuth2 error code reported by the provider.
    #[serde(default)]
    pub error: Option<String>,
    /// Description accompanying `error`.
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Optional post-login / post-logout redirect target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    #[serde(default)]
    pub redirect_uri: Option<String>,
}

/// Owner of the authorization-code flow and the session cookie lifecycle.
#[derive(Debug, Clone)]
pub struct AuthGateway {
    config: AuthConfig,
    oauth: OAuthClient,
}

impl AuthGateway {
    /// Creates a gateway for the configured provider.
    pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
        let oauth = OAuthClient::new(config.oauth.clone(), config.request_timeout)?;
        Ok(Self { config, oauth })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Starts a login: issues the state cookie and returns the provider
    /// authorization URL to redirect to.
    pub fn login(
        &self,
        jar: CookieJar,
        redirect_uri: Option<&str>,
    ) -> Result<(CookieJar, Url), AuthError> {
        let target = local_redirect(redirect_target(redirect_uri))?;

        let state = codec::encode(&SessionState::new(target))?;
        let state_cookie = Cookie::build((self.config.state_cookie_name.clone(), state.clone()))
            .path("/")
            .http_only(true)
            .expires(OffsetDateTime::now_utc() + self.config.state_ttl);

        let url = self.oauth.authorization_url(&state);
        tracing::debug!(redirect_uri = %target, "login started");

        Ok((jar.add(state_cookie), url))
    }

    /// Completes a login: validates the callback against the state cookie,
    /// exchanges the code and stores the session cookie.
    ///
    /// Returns the jar with the session cookie set and the state cookie
    /// expired, and the validated post-login redirect target. On any error no
    /// cookie is changed.
    pub async fn callback(
        &self,
        jar: CookieJar,
        params: &CallbackParams,
    ) -> Result<(CookieJar, String), AuthError> {
        check_provider_error(params)?;

        let state = self.verify_state(&jar, params.state.as_deref())?;
        let target = local_redirect(redirect_target(Some(&state.redirect_uri)))?.to_string();

        let code = params
            .code
            .as_deref()
            .filter(|code| !code.is_empty())
            .ok_or_else(|| AuthError::invalid_request("missing authorization code"))?;

        let token = self.oauth.exchange(code).await?;

        let mut session_cookie =
            Cookie::build((self.config.auth_cookie_name.clone(), token.session_value()))
                .path("/")
                .http_only(true);
        if let Some(expiry) = token.expiry {
            session_cookie = session_cookie.expires(expiry);
        }

        tracing::info!(redirect_uri = %target, "session established");

        let jar = jar
            .add(session_cookie)
            .add(removal_cookie(&self.config.state_cookie_name));
        Ok((jar, target))
    }

    /// Ends the session: expires the session cookie and returns the validated
    /// redirect target.
    pub fn logout(
        &self,
        jar: CookieJar,
        redirect_uri: Option<&str>,
    ) -> Result<(CookieJar, String), AuthError> {
        let target = local_redirect(redirect_target(redirect_uri))?.to_string();
        let jar = jar.add(removal_cookie(&self.config.auth_cookie_name));
        Ok((jar, target))
    }

    /// Decodes the claims segment of the session token for display.
    ///
    /// The signature is not verified; the result must never drive an
    /// authorization decision.
    pub fn user_info(&self, jar: &CookieJar) -> Result<Map<String, Value>, AuthError> {
        let cookie = jar
            .get(&self.config.auth_cookie_name)
            .ok_or_else(|| AuthError::unauthorized("missing session cookie"))?;

        let segments: Vec<&str> = cookie.value_trimmed().split('.').collect();
        if segments.len() < 2 {
            return Err(AuthError::unauthorized("malformed session cookie"));
        }

        codec::decode(segments[1])
            .map_err(|e| AuthError::unauthorized(format!("session payload: {e}")))
    }

    /// Request modifier for the proxy: moves the session cookie value into
    /// the `Authorization` header and strips the `Cookie` header.
    ///
    /// Without a session cookie the request is forwarded without credentials.
    /// Applying it twice yields the same headers as applying it once.
    pub fn modify_header(&self, headers: &mut HeaderMap) -> Result<(), AuthError> {
        let jar = CookieJar::from_headers(headers);
        let session = jar
            .get(&self.config.auth_cookie_name)
            .map(|cookie| HeaderValue::from_str(cookie.value_trimmed()))
            .transpose()
            .map_err(|e| AuthError::invalid_request(format!("session cookie: {e}")))?;

        match session {
            Some(value) => {
                headers.insert(AUTHORIZATION, value);
            }
            None => tracing::debug!("no session cookie on proxied request"),
        }
        headers.remove(COOKIE);
        Ok(())
    }

    fn verify_state(
        &self,
        jar: &CookieJar,
        state_param: Option<&str>,
    ) -> Result<SessionState, AuthError> {
        let cookie = jar
            .get(&self.config.state_cookie_name)
            .ok_or_else(|| AuthError::invalid_state("missing state cookie"))?;

        let stored = cookie.value_trimmed();
        if stored != state_param.unwrap_or_default() {
            return Err(AuthError::StateMismatch);
        }

        let state: SessionState = codec::decode(stored)?;

        let age_secs = OffsetDateTime::now_utc().unix_timestamp() - state.timestamp;
        let ttl_secs = i64::try_from(self.config.state_ttl.as_secs()).unwrap_or(i64::MAX);
        if age_secs > ttl_secs {
            return Err(AuthError::StateExpired { age_secs });
        }

        Ok(state)
    }
}

fn redirect_target(redirect_uri: Option<&str>) -> &str {
    redirect_uri.filter(|uri| !uri.is_empty()).unwrap_or("/")
}

fn check_provider_error(params: &CallbackParams) -> Result<(), AuthError> {
    let error = params.error.as_deref().unwrap_or_default();
    let description = params.error_description.as_deref().unwrap_or_default();
    if error.is_empty() && description.is_empty() {
        return Ok(());
    }
    Err(AuthError::identity_provider(error, description))
}

/// Accepts `target` only if it is a relative reference that stays on this
/// origin: no scheme and no authority component.
pub fn local_redirect(target: &str) -> Result<&str, AuthError> {
    match Url::parse(target) {
        Err(url::ParseError::RelativeUrlWithoutBase) => {}
        _ => return Err(AuthError::invalid_redirect(target)),
    }

    let base = Url::parse(REDIRECT_BASE).map_err(|e| AuthError::configuration(e.to_string()))?;
    let resolved = base
        .join(target)
        .map_err(|_| AuthError::invalid_redirect(target))?;

    if resolved.host_str() != base.host_str() || resolved.port().is_some() || target.starts_with("//")
    {
        return Err(AuthError::invalid_redirect(target));
    }

    Ok(target)
}

/// Cookie that makes the browser drop `name` immediately.
fn removal_cookie(name: &str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name.to_string(), ""))
        .path("/")
        .http_only(true)
        .build();
    cookie.make_removal();
    cookie
}
