//! Shared harness for route-level tests: an in-process mock upstream
//! registry and a packbay app wired against it.

// Each test binary uses a different subset of the harness.
#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get as axum_get;
use axum::Router;
use packbay_core::ProxyConfig;
use packbay_server::{AppState, SharedState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

#[derive(Clone)]
struct MockState {
    tarball: Arc<Vec<u8>>,
    integrity: String,
    readme: String,
    tarball_hits: Arc<AtomicUsize>,
    addr: SocketAddr,
}

/// A tiny upstream registry serving one version (`1.3.0`) of any package
/// name, with a counting tarball endpoint.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub tarball_hits: Arc<AtomicUsize>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(tarball: Vec<u8>, integrity: String, readme: &str) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tarball_hits = Arc::new(AtomicUsize::new(0));

        let state = MockState {
            tarball: Arc::new(tarball),
            integrity,
            readme: readme.to_string(),
            tarball_hits: Arc::clone(&tarball_hits),
            addr,
        };
        let router = Router::new()
            .route("/:package", axum_get(mock_packument))
            .route("/:package/-/:filename", axum_get(mock_tarball))
            .with_state(state);

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            tarball_hits,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Simulate the upstream going away.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

async fn mock_packument(
    State(state): State<MockState>,
    Path(package): Path<String>,
) -> Response {
    if package == "missing" {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(json!({
        "name": package,
        "description": "mock package",
        "readme": state.readme,
        "dist-tags": { "latest": "1.3.0" },
        "versions": {
            "1.3.0": {
                "dist": {
                    "tarball": format!("http://{}/{package}/-/{package}-1.3.0.tgz", state.addr),
                    "integrity": state.integrity,
                }
            }
        }
    }))
    .into_response()
}

async fn mock_tarball(State(state): State<MockState>) -> Response {
    state.tarball_hits.fetch_add(1, Ordering::SeqCst);
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        state.tarball.as_ref().clone(),
    )
        .into_response()
}

/// A packbay app rooted in a temp directory.
pub struct TestApp {
    pub dir: TempDir,
    pub state: SharedState,
    pub router: Router,
}

pub fn build_app(registry_url: &str) -> TestApp {
    let dir = TempDir::new().unwrap();
    let config = ProxyConfig {
        registry_url: registry_url.to_string(),
        cache_dir: dir.path().join("cache"),
        db_path: dir.path().join("db"),
        // Nothing listens here: the model backend is always "down" in tests.
        model_backend_url: "http://127.0.0.1:9".to_string(),
        ..ProxyConfig::default()
    };
    let state = AppState::build(config).unwrap();
    let router = packbay_server::router(Arc::clone(&state));
    TestApp { dir, state, router }
}

pub async fn get(router: &Router, uri: &str, host: &str) -> (StatusCode, Bytes) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::HOST, host)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::HOST, "test:4873")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub fn parse_json(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

/// Poll `check` until it returns true or ~2 seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    false
}
