//! End-to-end tests for the HTTP surface.
//!
//! Most tests drive the router in-process with `tower::ServiceExt::oneshot`,
//! attaching `ConnectInfo` by hand to simulate different peers. The final
//! group binds a real listener and talks to it with `reqwest`, covering the
//! `into_make_service_with_connect_info` wiring.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use solar_epc_api::{AppState, Config, build_router};

fn test_config(max_requests: u32) -> Config {
    Config {
        rate_limit_max_requests: max_requests,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_sweep_interval: Duration::ZERO,
        ..Config::default()
    }
}

fn app(config: Config) -> (Router, AppState) {
    let state = AppState::new(config).expect("valid test config");
    (build_router(state.clone()), state)
}

fn get_from(path: &str, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    Request::builder()
        .uri(path)
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_healthz_returns_ok() {
    let (router, _state) = app(test_config(60));

    let response = router
        .oneshot(get_from("/healthz", "127.0.0.1:5000"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

// =============================================================================
// Rate Limiting
// =============================================================================

#[tokio::test]
async fn test_requests_over_limit_get_429() {
    let (router, _state) = app(test_config(3));

    for _ in 0..3 {
        let response = router
            .clone()
            .oneshot(get_from("/healthz", "10.0.0.1:1234"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .oneshot(get_from("/healthz", "10.0.0.1:1234"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
    assert_eq!(
        json_body(response).await,
        json!({"detail": "Too Many Requests"})
    );
}

#[tokio::test]
async fn test_clients_are_limited_independently() {
    let (router, _state) = app(test_config(1));

    let a1 = router
        .clone()
        .oneshot(get_from("/healthz", "10.0.0.1:1"))
        .await
        .unwrap();
    let a2 = router
        .clone()
        .oneshot(get_from("/healthz", "10.0.0.1:2"))
        .await
        .unwrap();
    let b1 = router
        .oneshot(get_from("/healthz", "10.0.0.2:1"))
        .await
        .unwrap();

    assert_eq!(a1.status(), StatusCode::OK);
    assert_eq!(a2.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(b1.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_peer_shares_unknown_bucket() {
    let (router, state) = app(test_config(1));

    let request = || Request::builder().uri("/healthz").body(Body::empty()).unwrap();

    let first = router.clone().oneshot(request()).await.unwrap();
    let second = router.oneshot(request()).await.unwrap();

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(state.limiter.logged_requests("unknown"), 1);
}

#[tokio::test]
async fn test_forwarded_header_requires_trusted_proxy() {
    let config = Config {
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..test_config(1)
    };
    let (router, state) = app(config);

    let via_proxy = |client: &str| {
        Request::builder()
            .uri("/healthz")
            .header("x-forwarded-for", client)
            .extension(ConnectInfo("10.1.2.3:443".parse::<SocketAddr>().unwrap()))
            .body(Body::empty())
            .unwrap()
    };

    // Two clients behind the same trusted proxy get separate buckets
    let r1 = router.clone().oneshot(via_proxy("203.0.113.1")).await.unwrap();
    let r2 = router.clone().oneshot(via_proxy("203.0.113.2")).await.unwrap();
    assert_eq!(r1.status(), StatusCode::OK);
    assert_eq!(r2.status(), StatusCode::OK);

    // A direct client cannot choose its bucket by spoofing the header
    let spoofed = Request::builder()
        .uri("/healthz")
        .header("x-forwarded-for", "203.0.113.99")
        .extension(ConnectInfo("198.51.100.5:5000".parse::<SocketAddr>().unwrap()))
        .body(Body::empty())
        .unwrap();
    let r3 = router.oneshot(spoofed).await.unwrap();
    assert_eq!(r3.status(), StatusCode::OK);

    assert_eq!(state.limiter.logged_requests("198.51.100.5"), 1);
    assert_eq!(state.limiter.logged_requests("203.0.113.99"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_exceed_limit() {
    let (router, _state) = app(test_config(20));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            router
                .oneshot(get_from("/healthz", "192.0.2.10:8080"))
                .await
                .unwrap()
                .status()
        }));
    }

    let mut ok = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(ok, 20);
    assert_eq!(limited, 80);
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_headers_on_simple_request() {
    let (router, _state) = app(test_config(60));

    let request = Request::builder()
        .uri("/healthz")
        .header(header::ORIGIN, "https://portal.example.com")
        .extension(ConnectInfo("127.0.0.1:5000".parse::<SocketAddr>().unwrap()))
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_preflight_counts_against_quota() {
    let (router, state) = app(test_config(1));

    let preflight = || {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/healthz")
            .header(header::ORIGIN, "https://portal.example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE")
            .extension(ConnectInfo("10.9.9.9:5000".parse::<SocketAddr>().unwrap()))
            .body(Body::empty())
            .unwrap()
    };

    let response = router.clone().oneshot(preflight()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let methods = response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap()
        .to_string();
    for method in ["GET", "POST", "PUT", "DELETE", "OPTIONS"] {
        assert!(methods.contains(method), "missing {method} in {methods}");
    }

    let response = router.clone().oneshot(preflight()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        json_body(response).await,
        json!({"detail": "Too Many Requests"})
    );
    assert_eq!(state.limiter.logged_requests("10.9.9.9"), 1);

    // The preflight used the only slot, so a real request is refused too
    let response = router
        .oneshot(get_from("/healthz", "10.9.9.9:5001"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_rejection_comes_from_limiter_without_cors_headers() {
    let (router, _state) = app(test_config(1));

    let request = || {
        Request::builder()
            .uri("/healthz")
            .header(header::ORIGIN, "https://portal.example.com")
            .extension(ConnectInfo("127.0.0.1:5000".parse::<SocketAddr>().unwrap()))
            .body(Body::empty())
            .unwrap()
    };

    let admitted = router.clone().oneshot(request()).await.unwrap();
    assert!(
        admitted
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );

    let response = router.oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    assert!(
        !response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}

// =============================================================================
// Real Listener
// =============================================================================

/// Serve the app on an ephemeral port and return its base URL.
async fn spawn_server(config: Config) -> String {
    let (router, _state) = app(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{addr}")
}

#[tokio::test]
async fn test_real_server_limits_by_peer_address() {
    let base_url = spawn_server(test_config(2)).await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let response = client
            .get(format!("{base_url}/healthz"))
            .send()
            .await
            .unwrap();
        statuses.push(response.status().as_u16());
    }
    assert_eq!(statuses, vec![200, 200, 429]);

    let body: Value = client
        .get(format!("{base_url}/healthz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"detail": "Too Many Requests"}));
}
