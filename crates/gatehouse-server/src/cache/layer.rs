//! Tower middleware serving GET requests through the shared cache.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures_util::future::BoxFuture;
use tower::{Layer, Service, ServiceExt};

use super::backend::CacheBackend;
use super::key::CacheKeyer;
use crate::error::StatusError;

/// URL and headers of the request that triggered a cache miss, replayed as
/// a synthetic GET against the wrapped service.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl LoadRequest {
    pub fn from_request(req: Request) -> Self {
        let (parts, _body) = req.into_parts();
        Self {
            uri: parts.uri,
            headers: parts.headers,
        }
    }

    pub fn into_request(self) -> Request {
        let mut req = Request::new(Body::empty());
        *req.method_mut() = Method::GET;
        *req.uri_mut() = self.uri;
        *req.headers_mut() = self.headers;
        req
    }
}

/// Reply body for loads that failed inside the gateway.
const LOAD_FAILED: &str = "upstream response could not be cached";

/// Failure to produce a cacheable body.
#[derive(Debug, thiserror::Error)]
pub enum CacheLoadError {
    /// The wrapped service answered with a status of 400 or above.
    #[error(transparent)]
    Status(StatusError),

    /// The response body could not be read or exceeds the entry limit.
    #[error("read response body: {0}")]
    Body(#[source] axum::Error),
}

impl CacheLoadError {
    fn into_response_for(self: Arc<Self>, key: &str) -> Response {
        match &*self {
            CacheLoadError::Status(status_error) => {
                tracing::warn!(key = %key, error = %self, "cache load rejected");
                (status_error.status(), status_error.to_string()).into_response()
            }
            CacheLoadError::Body(_) => {
                tracing::error!(key = %key, error = %self, "cache load failed");
                (StatusCode::INTERNAL_SERVER_ERROR, LOAD_FAILED).into_response()
            }
        }
    }
}

/// Layer applying [`ResponseCache`].
#[derive(Debug, Clone)]
pub struct ResponseCacheLayer {
    backend: CacheBackend,
    keyer: CacheKeyer,
    max_entry_bytes: usize,
}

impl ResponseCacheLayer {
    pub fn new(backend: CacheBackend, keyer: CacheKeyer, max_entry_bytes: usize) -> Self {
        Self {
            backend,
            keyer,
            max_entry_bytes,
        }
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCache<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCache {
            inner,
            backend: self.backend.clone(),
            keyer: self.keyer,
            max_entry_bytes: self.max_entry_bytes,
        }
    }
}

/// Serves GET requests from the cache, loading misses through the wrapped
/// service. Only the body of a successful load is kept; a hit is always
/// answered with `200 OK` and that body.
#[derive(Debug, Clone)]
pub struct ResponseCache<S> {
    inner: S,
    backend: CacheBackend,
    keyer: CacheKeyer,
    max_entry_bytes: usize,
}

impl<S> Service<Request> for ResponseCache<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The inner service is cloned and driven with `oneshot` per call.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        if req.method() != Method::GET {
            return Box::pin(inner.oneshot(req));
        }

        let backend = self.backend.clone();
        let max_entry_bytes = self.max_entry_bytes;
        let load = LoadRequest::from_request(req);
        let key = self.keyer.key(&load.uri.to_string());

        Box::pin(async move {
            tracing::debug!(key = %key, "fetching key");

            let result = backend
                .get_or_load(&key, move || load_response(inner, load, max_entry_bytes))
                .await;

            Ok(match result {
                Ok(bytes) => {
                    tracing::debug!(key = %key, size = bytes.len(), "found key");
                    let mut response = Response::new(Body::from(bytes));
                    *response.status_mut() = StatusCode::OK;
                    response
                }
                Err(err) => err.into_response_for(&key),
            })
        })
    }
}

async fn load_response<S>(
    inner: S,
    load: LoadRequest,
    max_entry_bytes: usize,
) -> Result<Bytes, CacheLoadError>
where
    S: Service<Request, Response = Response, Error = Infallible>,
{
    let response = match inner.oneshot(load.into_request()).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let status = response.status();
    if status.as_u16() >= 400 {
        return Err(CacheLoadError::Status(StatusError::new(
            status,
            format!("http error : {}", status.as_u16()),
        )));
    }

    axum::body::to_bytes(response.into_body(), max_entry_bytes)
        .await
        .map_err(CacheLoadError::Body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use axum::http::{self, header::AUTHORIZATION};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn layer() -> ResponseCacheLayer {
        let config = CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        };
        ResponseCacheLayer::new(
            CacheBackend::new_local(&config),
            CacheKeyer::new(config.ttl),
            1024,
        )
    }

    fn counting_service(
        calls: Arc<AtomicUsize>,
        status: StatusCode,
    ) -> impl Service<Request, Response = Response, Error = Infallible, Future: Send> + Clone + Send + 'static
    {
        tower::service_fn(move |req: Request| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .unwrap_or_default();
                let body = format!("{} {} {}", req.method(), req.uri(), auth);
                Ok::<_, Infallible>((status, body).into_response())
            }
        })
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_load_request_replays_as_get() {
        let req = http::Request::builder()
            .method(Method::HEAD)
            .uri("/api/items?page=2")
            .header(AUTHORIZATION, "Bearer t")
            .body(Body::empty())
            .unwrap();

        let replay = LoadRequest::from_request(req).into_request();
        assert_eq!(replay.method(), Method::GET);
        assert_eq!(replay.uri(), "/api/items?page=2");
        assert_eq!(replay.headers().get(AUTHORIZATION).unwrap(), "Bearer t");
    }

    #[tokio::test]
    async fn test_miss_loads_with_original_headers_then_hits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = layer().layer(counting_service(calls.clone(), StatusCode::OK));

        let req = http::Request::builder()
            .uri("/api/items")
            .header(AUTHORIZATION, "Bearer t")
            .body(Body::empty())
            .unwrap();
        let first = service.clone().oneshot(req).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(body_string(first).await, "GET /api/items Bearer t");

        let req = http::Request::get("/api/items").body(Body::empty()).unwrap();
        let second = service.clone().oneshot(req).await.unwrap();
        assert_eq!(body_string(second).await, "GET /api/items Bearer t");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = layer().layer(counting_service(calls.clone(), StatusCode::NOT_FOUND));

        for _ in 0..2 {
            let req = http::Request::get("/api/missing").body(Body::empty()).unwrap();
            let response = service.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_string(response).await, "http error : 404");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = layer().layer(counting_service(calls.clone(), StatusCode::CREATED));

        for _ in 0..2 {
            let req = http::Request::post("/api/items").body(Body::empty()).unwrap();
            let response = service.clone().oneshot(req).await.unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
            assert_eq!(body_string(response).await, "POST /api/items ");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_cached() {
        let service = layer().layer(tower::service_fn(|_req: Request| async {
            Ok::<_, Infallible>("x".repeat(4096).into_response())
        }));

        let req = http::Request::get("/api/large").body(Body::empty()).unwrap();
        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, LOAD_FAILED);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = {
            let calls = calls.clone();
            tower::service_fn(move |_req: Request| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, Infallible>("shared".into_response())
                }
            })
        };
        let service = layer().layer(slow);

        let request = || http::Request::get("/api/slow").body(Body::empty()).unwrap();
        let (a, b) = tokio::join!(
            service.clone().oneshot(request()),
            service.clone().oneshot(request()),
        );

        assert_eq!(body_string(a.unwrap()).await, "shared");
        assert_eq!(body_string(b.unwrap()).await, "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
