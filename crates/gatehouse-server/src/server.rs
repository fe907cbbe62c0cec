use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::Request,
    handler::Handler,
    middleware,
    response::IntoResponse,
    routing::get,
};
use gatehouse_auth::{AuthGateway, auth_routes};
use tower::{Layer, Service};
use tower_http::{limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    cache::{CacheKeyer, ResponseCacheLayer, add_cache_control, cache_control_value},
    config::AppConfig,
    create_cache_backend, handlers,
    proxy::{self, ReverseProxy, proxy_handler},
};

pub struct GatehouseServer {
    addr: SocketAddr,
    app: Router,
}

/// Assembles the application router:
///
/// - `/auth/*` session endpoints
/// - the proxy mount (target path + `/`), behind the response cache when enabled
/// - `/healthz`
/// - static assets for everything else, when an asset directory is configured
///
/// Request bodies larger than `server.body_limit_bytes` are rejected with
/// `413`, proxied uploads included.
pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let gateway = Arc::new(AuthGateway::new(cfg.auth.clone())?);
    let proxy = Arc::new(
        ReverseProxy::new(&cfg.proxy)?.with_modifier(proxy::session_header(gateway.clone())),
    );
    let prefix = cfg.proxy.mount_prefix()?;
    tracing::info!(target = %proxy.target(), prefix = %prefix, "Proxy configured");

    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(auth_routes(gateway));

    if prefix != "/" {
        if let Some(dir) = &cfg.assets.dir {
            tracing::info!(dir = %dir.display(), "Serving static assets");
            router = router.fallback_service(ServeDir::new(dir));
        }
    }

    let proxy_service = proxy_handler.with_state(proxy);
    let router = if cfg.cache.enabled {
        let backend = create_cache_backend(&cfg.cache).await;
        let cached = ResponseCacheLayer::new(
            backend,
            CacheKeyer::new(cfg.cache.ttl),
            cfg.cache.max_entry_bytes,
        )
        .layer(proxy_service);

        if cfg.cache.cache_control {
            let value = cache_control_value(cfg.cache.ttl)?;
            let decorated = middleware::map_response_with_state(value, add_cache_control).layer(cached);
            mount(router, &prefix, decorated)
        } else {
            mount(router, &prefix, cached)
        }
    } else {
        mount(router, &prefix, proxy_service)
    };

    Ok(router
        .layer(RequestBodyLimitLayer::new(cfg.server.body_limit_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        ))
}

/// Mounts `service` on everything under `prefix`.
fn mount<S>(router: Router, prefix: &str, service: S) -> Router
where
    S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    if prefix == "/" {
        return router.fallback_service(service);
    }
    router
        .route_service(prefix, service.clone())
        .route_service(&format!("{prefix}{{*path}}"), service)
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<GatehouseServer> {
        let app = build_app(&self.config).await?;

        Ok(GatehouseServer {
            addr: self.addr,
            app,
        })
    }
}

impl GatehouseServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
