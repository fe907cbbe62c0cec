//! # gatehouse-auth
//!
//! OAuth2 authorization-code session gateway for Gatehouse.
//!
//! A browser logs in through the identity provider, and the resulting access
//! token is kept in an http-only cookie. Proxied API calls present that
//! token as an `Authorization` header instead of a cookie.
//!
//! ## Modules
//!
//! - [`config`] - Provider endpoints, client credentials and cookie names
//! - [`codec`] - Base64/JSON encoding of the login state and token payloads
//! - [`oauth`] - Authorization URL construction and code exchange
//! - [`gateway`] - Login, callback, logout, user info and header rewriting
//! - [`http`] - Axum handlers and router for the `/auth/*` endpoints
//! - [`error`] - Error types mapped to HTTP responses

pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod oauth;

pub use codec::SessionState;
pub use config::{AuthConfig, ConfigError, OAuthClientConfig};
pub use error::AuthError;
pub use gateway::{AuthGateway, CallbackParams, RedirectParams, local_redirect};
pub use http::auth_routes;
pub use oauth::{OAuthClient, Token};

/// Result type for session gateway operations.
pub type AuthResult<T> = Result<T, AuthError>;
