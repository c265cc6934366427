//! Route-level tests for the proxy family: cache hits, single-flight
//! downloads, integrity threats, and offline metadata fallback.

mod common;

use axum::http::StatusCode;
use common::{build_app, eventually, get, parse_json, MockUpstream};
use packbay_core::hash::{digest_bytes, Algorithm};
use packbay_store::EventKind;
use std::sync::atomic::Ordering;

fn sample_tarball() -> Vec<u8> {
    (0..50_000u32).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_cache_hit_makes_no_upstream_call() {
    let data = sample_tarball();
    let integrity = digest_bytes(&data, Algorithm::Sha512);
    let upstream = MockUpstream::start(data.clone(), integrity, "readme").await;
    let app = build_app(&upstream.url());

    // Pre-place the tarball after startup reclamation has run.
    let cache = app.dir.path().join("cache");
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join("express-4.18.2.tgz"), &data).unwrap();

    let (status, body) = get(&app.router, "/express/-/express-4.18.2.tgz", "h:1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), data.as_slice());
    assert_eq!(upstream.tarball_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_requests_are_single_flight() {
    let data = sample_tarball();
    let integrity = digest_bytes(&data, Algorithm::Sha512);
    let upstream = MockUpstream::start(data.clone(), integrity, "readme").await;
    let app = build_app(&upstream.url());

    let mut handles = Vec::new();
    for _ in 0..5 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            get(&router, "/left-pad/-/left-pad-1.3.0.tgz", "h:1").await
        }));
    }

    for handle in handles {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), data.as_slice(), "all clients get equal bytes");
    }

    assert_eq!(
        upstream.tarball_hits.load(Ordering::SeqCst),
        1,
        "exactly one upstream GET for the tarball"
    );

    // Verification runs after the tee completes; wait for the record.
    let state = app.state.clone();
    assert!(
        eventually(|| {
            state
                .store
                .get_package("left-pad", "1.3.0")
                .unwrap()
                .is_some_and(|record| record.verified)
        })
        .await,
        "a verified package record should appear"
    );

    let stats = app.state.store.verification_stats().unwrap();
    assert_eq!(stats.total, 1, "exactly one verification event");
    assert_eq!(stats.successful, 1);
}

#[tokio::test]
async fn test_integrity_mismatch_deletes_file_and_records_threat() {
    let data = sample_tarball();
    // Integrity declared over different bytes: one trailing byte appended.
    let mut tampered = data.clone();
    tampered.push(0xFF);
    let integrity = digest_bytes(&tampered, Algorithm::Sha512);
    let upstream = MockUpstream::start(data, integrity.clone(), "readme").await;
    let app = build_app(&upstream.url());

    let (status, _body) = get(&app.router, "/left-pad/-/left-pad-1.3.0.tgz", "h:1").await;
    // The stream was already committed to before the digest could be known.
    assert_eq!(status, StatusCode::OK);

    let cached = app.dir.path().join("cache/left-pad-1.3.0.tgz");
    let state = app.state.clone();
    assert!(
        eventually(|| {
            !cached.exists()
                && state
                    .store
                    .verification_stats()
                    .unwrap()
                    .threats_detected
                    == 1
        })
        .await,
        "corrupt tarball should be deleted and a threat recorded"
    );

    let events = app.state.store.recent_events(10).unwrap();
    let threat = events
        .iter()
        .find(|e| e.kind == EventKind::ThreatDetected)
        .expect("threat event present");
    assert_eq!(threat.expected_digest.as_deref(), Some(integrity.as_str()));
    assert!(threat.observed_digest.is_some());
    assert_ne!(threat.observed_digest, threat.expected_digest);

    let record = app
        .state
        .store
        .get_package("left-pad", "1.3.0")
        .unwrap()
        .expect("record exists even for failed verification");
    assert!(!record.verified);
}

#[tokio::test]
async fn test_offline_metadata_rewrites_to_current_host() {
    let data = sample_tarball();
    let integrity = digest_bytes(&data, Algorithm::Sha512);
    let upstream = MockUpstream::start(data, integrity, "readme").await;
    let app = build_app(&upstream.url());

    let (status, body) = get(&app.router, "/lodash", "h1:4873").await;
    assert_eq!(status, StatusCode::OK);
    let doc = parse_json(&body);
    let url = doc["versions"]["1.3.0"]["dist"]["tarball"].as_str().unwrap();
    assert_eq!(url, "http://h1:4873/lodash/-/lodash-1.3.0.tgz");

    // Cut the upstream and come back under a different advertised host.
    upstream.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (status, body) = get(&app.router, "/lodash", "h2:4873").await;
    assert_eq!(status, StatusCode::OK, "cached metadata still serves");
    let doc = parse_json(&body);
    let url = doc["versions"]["1.3.0"]["dist"]["tarball"].as_str().unwrap();
    assert_eq!(
        url, "http://h2:4873/lodash/-/lodash-1.3.0.tgz",
        "authority must follow the live request host"
    );
}

#[tokio::test]
async fn test_upstream_down_with_no_cache_is_502() {
    let app = build_app("http://127.0.0.1:9");
    let (status, _body) = get(&app.router, "/lodash", "h:1").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_unknown_package_is_404() {
    let data = sample_tarball();
    let integrity = digest_bytes(&data, Algorithm::Sha512);
    let upstream = MockUpstream::start(data, integrity, "readme").await;
    let app = build_app(&upstream.url());

    let (status, _body) = get(&app.router, "/missing", "h:1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_tarball_filename_is_rejected() {
    let app = build_app("http://127.0.0.1:9");
    let (status, _body) = get(&app.router, "/pkg/-/%2e%2e%2fescape.tgz", "h:1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_startup_reclaims_unverified_leftovers() {
    let data = sample_tarball();
    let integrity = digest_bytes(&data, Algorithm::Sha512);
    let upstream = MockUpstream::start(data.clone(), integrity, "readme").await;

    // First app instance: precache-like layout left behind without records.
    let dir = tempfile::TempDir::new().unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join("orphan-1.0.0.tgz"), b"stale").unwrap();
    std::fs::write(cache.join("torn-1.0.0.tgz.part"), b"stale").unwrap();

    let config = packbay_core::ProxyConfig {
        registry_url: upstream.url(),
        cache_dir: cache.clone(),
        db_path: dir.path().join("db"),
        model_backend_url: "http://127.0.0.1:9".to_string(),
        ..packbay_core::ProxyConfig::default()
    };
    let _state = packbay_server::AppState::build(config).unwrap();

    assert!(!cache.join("orphan-1.0.0.tgz").exists());
    assert!(!cache.join("torn-1.0.0.tgz.part").exists());
}
