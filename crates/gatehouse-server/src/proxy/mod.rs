//! Reverse proxy to the upstream API.
//!
//! Each inbound request produces exactly one outbound request:
//! 1. The inbound path and query are resolved against the target base URL
//! 2. Inbound headers are copied, minus hop-by-hop headers
//! 3. Modifiers run in order (session header injection)
//! 4. The response status and headers are relayed, then the body: event
//!    streams through [`StreamRelay`], everything else as a plain stream

pub mod modifier;
pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, Uri, header::CONTENT_TYPE},
    response::Response,
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::{ConfigError, ProxyConfig};
use crate::error::ProxyError;

pub use modifier::{Modifier, modifier, session_header};
pub use stream::StreamRelay;

/// Forwards requests to a single upstream base URL.
#[derive(Clone)]
pub struct ReverseProxy {
    target: Url,
    client: reqwest::Client,
    modifiers: Vec<Modifier>,
    relay: StreamRelay,
    timeout: Duration,
}

impl std::fmt::Debug for ReverseProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReverseProxy")
            .field("target", &self.target.as_str())
            .field("modifiers", &self.modifiers.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReverseProxy {
    pub fn new(config: &ProxyConfig) -> Result<Self, ConfigError> {
        let target = config.target_url()?;
        // Redirects are relayed to the client, never followed.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("proxy http client: {e}")))?;

        Ok(Self {
            target,
            client,
            modifiers: Vec::new(),
            relay: StreamRelay::new(config.flush_interval, config.chunk_size),
            timeout: config.timeout,
        })
    }

    /// Appends a modifier; modifiers run in the order they are added.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Resolves the inbound request target against the upstream base.
    ///
    /// The authority always comes from the base, so an inbound path cannot
    /// redirect the request to another host.
    pub fn outbound_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }

    /// Forwards `req` upstream and relays the response.
    #[instrument(skip_all, fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let url = self.outbound_url(&parts.uri);

        let mut outbound = reqwest::Request::new(parts.method, url);
        copy_headers(&parts.headers, outbound.headers_mut());
        if !body.is_end_stream() {
            *outbound.body_mut() = Some(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        modifier::apply(&self.modifiers, &mut outbound).map_err(ProxyError::Modifier)?;

        debug!(target_url = %outbound.url(), "Proxying request");

        let upstream = tokio::time::timeout(self.timeout, self.client.execute(outbound))
            .await
            .map_err(|_| ProxyError::Timeout(self.timeout))??;

        let status = upstream.status();
        let mut headers = HeaderMap::with_capacity(upstream.headers().len());
        copy_headers(upstream.headers(), &mut headers);
        let event_stream = is_event_stream(upstream.headers());

        debug!(status = %status, event_stream, "Upstream responded");

        let body = if event_stream {
            info!("Relaying event stream");
            self.relay.relay(upstream.bytes_stream())
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Axum handler forwarding every request it receives.
pub async fn proxy_handler(
    State(proxy): State<Arc<ReverseProxy>>,
    req: Request,
) -> Result<Response, ProxyError> {
    proxy.forward(req).await
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Checks if a header is a hop-by-hop header that should not be forwarded.
///
/// Hop-by-hop headers are defined in RFC 2616 Section 13.5.1.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host" // Host is derived from the target
    )
}

/// `text/event-stream`, compared on the media-type essence.
fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/event-stream"))
}
