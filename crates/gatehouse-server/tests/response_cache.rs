use std::time::Duration;

use gatehouse_auth::OAuthClientConfig;
use gatehouse_server::{AppConfig, build_app};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cached_config(target: String) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.auth.oauth = OAuthClientConfig {
        auth_url: "https://idp.example.com/authorize".to_string(),
        token_url: "https://idp.example.com/token".to_string(),
        client_id: "gatehouse".to_string(),
        client_secret: "secret".to_string(),
        redirect_url: "http://gatehouse.test/auth/callback".to_string(),
        scopes: vec![],
    };
    cfg.proxy.target = target;
    cfg.cache.enabled = true;
    // Wide buckets keep concurrent requests on one key.
    cfg.cache.ttl = Duration::from_secs(3600);
    cfg
}

async fn start_server(cfg: AppConfig) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let app = build_app(&cfg).await.expect("build app");

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
async fn concurrent_requests_share_one_upstream_call() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/report"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(200))
                .set_body_string("quarterly numbers"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(cached_config(format!("{}/api", upstream.uri()))).await;

    let client = reqwest::Client::new();
    let url = format!("{base}/api/report");
    let (a, b) = tokio::join!(client.get(&url).send(), client.get(&url).send());
    for resp in [a.unwrap(), b.unwrap()] {
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.headers()["cache-control"], "max-age=3600, private");
        assert_eq!(resp.text().await.unwrap(), "quarterly numbers");
    }

    // A later request in the same bucket is served from memory.
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "quarterly numbers");

    upstream.verify().await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn error_responses_are_not_cached() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .expect(2)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(cached_config(format!("{}/api", upstream.uri()))).await;

    for _ in 0..2 {
        let resp = reqwest::get(format!("{base}/api/missing")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert!(resp.headers().get("cache-control").is_none());
        assert_eq!(resp.text().await.unwrap(), "http error : 404");
    }

    upstream.verify().await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn writes_bypass_the_cache() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/report"))
        .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
        .expect(2)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(cached_config(format!("{}/api", upstream.uri()))).await;

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let resp = client
            .post(format!("{base}/api/report"))
            .body("run")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 202);
        assert!(resp.headers().get("cache-control").is_none());
        assert_eq!(resp.text().await.unwrap(), "queued");
    }

    upstream.verify().await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn distinct_urls_get_distinct_entries() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("A"))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("B"))
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_server(cached_config(format!("{}/api", upstream.uri()))).await;

    for _ in 0..2 {
        assert_eq!(reqwest::get(format!("{base}/api/a")).await.unwrap().text().await.unwrap(), "A");
        assert_eq!(reqwest::get(format!("{base}/api/b")).await.unwrap().text().await.unwrap(), "B");
    }

    upstream.verify().await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
