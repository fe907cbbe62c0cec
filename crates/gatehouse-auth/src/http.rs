//! HTTP endpoints of the session gateway.
//!
//! - `GET /auth/login?redirect_uri=...` - start the authorization-code flow
//! - `GET /auth/callback` - identity provider callback
//! - `GET /auth/logout?redirect_uri=...` - drop the session cookie
//! - `GET /auth/userinfo` - claims of the current session token

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::Redirect,
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde_json::{Map, Value};

use crate::error::AuthError;
use crate::gateway::{AuthGateway, CallbackParams, RedirectParams};

/// Handler for `GET /auth/login`.
pub async fn login_handler(
    State(gateway): State<Arc<AuthGateway>>,
    Query(params): Query<RedirectParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let (jar, url) = gateway.login(jar, params.redirect_uri.as_deref())?;
    Ok((jar, Redirect::temporary(url.as_str())))
}

/// Handler for `GET /auth/callback`.
pub async fn callback_handler(
    State(gateway): State<Arc<AuthGateway>>,
    Query(params): Query<CallbackParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let (jar, target) = gateway.callback(jar, &params).await?;
    Ok((jar, Redirect::temporary(&target)))
}

/// Handler for `GET /auth/logout`.
pub async fn logout_handler(
    State(gateway): State<Arc<AuthGateway>>,
    Query(params): Query<RedirectParams>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let (jar, target) = gateway.logout(jar, params.redirect_uri.as_deref())?;
    tracing::debug!(redirect_uri = %target, "session cleared");
    Ok((jar, Redirect::temporary(&target)))
}

/// Handler for `GET /auth/userinfo`.
pub async fn user_info_handler(
    State(gateway): State<Arc<AuthGateway>>,
    jar: CookieJar,
) -> Result<Json<Map<String, Value>>, AuthError> {
    gateway.user_info(&jar).map(Json)
}

/// Router with the four session endpoints, mergeable into any application
/// router.
pub fn auth_routes<S>(gateway: Arc<AuthGateway>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/logout", get(logout_handler))
        .route("/auth/userinfo", get(user_info_handler))
        .with_state(gateway)
}
