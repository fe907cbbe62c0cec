use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use gatehouse_auth::OAuthClientConfig;
use gatehouse_server::proxy::modifier;
use gatehouse_server::{AppConfig, ProxyConfig, ReverseProxy, StatusError, build_app};
use tokio::task::JoinHandle;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Matches requests that carry no `Cookie` header.
struct NoCookie;

impl wiremock::Match for NoCookie {
    fn matches(&self, request: &wiremock::Request) -> bool {
        !request.headers.contains_key("cookie")
    }
}

fn config(target: String) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.oauth = OAuthClientConfig {
        auth_url: "https://idp.example.com/authorize".to_string(),
        token_url: "https://idp.example.com/token".to_string(),
        client_id: "gatehouse".to_string(),
        client_secret: "secret".to_string(),
        redirect_url: "http://gatehouse.test/auth/callback".to_string(),
        scopes: vec!["openid".to_string()],
    };
    cfg.proxy.target = target;
    cfg
}

async fn start_server(cfg: AppConfig) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(&cfg).await.expect("build app");

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{addr}"), tx, server)
}

#[tokio::test]
async fn forwards_request_with_session_header() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("page", "2"))
        .and(header("authorization", "Bearer t0k"))
        .and(header("x-client", "web"))
        .and(NoCookie)
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-upstream", "yes")
                .set_body_string(r#"{"items":[]}"#),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(config(format!("{}/api", upstream.uri()))).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/api/items?page=2"))
        .header("cookie", "auth=Bearer%20t0k; theme=dark")
        .header("x-client", "web")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 201);
    assert_eq!(resp.headers()["x-upstream"], "yes");
    assert_eq!(resp.text().await.unwrap(), r#"{"items":[]}"#);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn relays_upstream_error_status_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such item"))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(config(format!("{}/api", upstream.uri()))).await;

    let resp = reqwest::get(format!("{base}/api/missing")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert_eq!(resp.text().await.unwrap(), "no such item");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn streams_request_body_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/items"))
        .and(body_string("name=widget"))
        .respond_with(ResponseTemplate::new(200).set_body_string("created"))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(config(format!("{}/api", upstream.uri()))).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/items"))
        .body("name=widget")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "created");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn oversized_request_body_is_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut cfg = config(format!("{}/api", upstream.uri()));
    cfg.server.body_limit_bytes = 16;
    let (base, shutdown_tx, handle) = start_server(cfg).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/api/upload"))
        .body(vec![b'x'; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 413);

    // Within the limit the upload still goes through.
    let resp = client
        .post(format!("{base}/api/upload"))
        .body("small")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    upstream.verify().await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn unreachable_upstream_is_internal_error() {
    // Reserve a port, then free it so nothing listens there.
    let listener = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (base, shutdown_tx, handle) = start_server(config(format!("http://{addr}/api"))).await;

    let resp = reqwest::get(format!("{base}/api/items")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 500);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn paths_outside_prefix_are_not_proxied() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(config(format!("{}/api", upstream.uri()))).await;

    let resp = reqwest::get(format!("{base}/other/items")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn modifier_status_error_short_circuits() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let proxy = ReverseProxy::new(&ProxyConfig {
        target: format!("{}/api", upstream.uri()),
        ..ProxyConfig::default()
    })
    .unwrap()
    .with_modifier(modifier::modifier(|_req| {
        Err(anyhow::Error::new(StatusError::new(
            StatusCode::FORBIDDEN,
            "tenant suspended",
        ))
        .context("checking tenant"))
    }));
    let proxy = Arc::new(proxy);

    let req = Request::get("/api/items").body(Body::empty()).unwrap();
    let err = proxy.forward(req).await.unwrap_err();
    assert_eq!(err.status_error().unwrap().status(), StatusCode::FORBIDDEN);

    let resp = err.into_response();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"tenant suspended");
}
