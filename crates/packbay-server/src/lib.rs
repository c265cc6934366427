//! HTTP surface of the packbay registry proxy.
//!
//! Two orthogonal route families share one axum router: the npm-compatible
//! proxy routes (`/{package}`, `/{package}/-/{filename}`) and the JSON API
//! under `/api`. Handlers are the only place the request host enters the
//! system; it propagates exclusively through metadata URL rewriting.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod api;
pub mod proxy;
pub mod state;

pub use state::{AppState, SharedState};

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full application router.
#[must_use]
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/chat", post(api::chat))
        .route("/api/hybrid-search", post(api::hybrid_search))
        .route("/api/stats", get(api::stats))
        .route("/api/vector-stats", get(api::vector_stats))
        .route("/api/security-stats", get(api::security_stats))
        .route("/api/rebuild-embeddings/:package", post(api::rebuild_embeddings))
        .route("/api/precache", post(api::precache))
        .route("/api/health", get(api::health))
        .route("/api/packages", get(api::packages))
        .route("/force-scrape/:package", get(api::force_scrape))
        .route("/:package", get(proxy::metadata))
        .route("/:package/-/:filename", get(proxy::tarball))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
