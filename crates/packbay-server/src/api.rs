//! JSON API routes.

use crate::state::SharedState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use packbay_core::meta::{latest_version, version_tarball};
use packbay_core::tarball::is_valid_filename;
use packbay_core::ProxyError;
use packbay_rag::{RagError, SearchHit};
use packbay_store::{PackageRecord, SecurityEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

/// Chunks returned by `/api/hybrid-search`.
const SEARCH_TOP_K: usize = 5;

#[derive(Deserialize)]
pub struct ChatRequest {
    question: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    answer: String,
    source: Option<String>,
    response_time_ms: u64,
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Response {
    let started = Instant::now();
    match state.chat.answer(&request.question).await {
        Ok(result) => Json(ChatResponse {
            answer: result.answer,
            source: result.source,
            response_time_ms: started.elapsed().as_millis() as u64,
        })
        .into_response(),
        Err(err) => internal_error(&err),
    }
}

#[derive(Deserialize)]
pub struct SearchRequest {
    query: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchHitDto {
    package_name: String,
    chunk_index: u32,
    text: String,
    vector_score: f32,
    lexical_score: f32,
    combined_score: f32,
}

impl From<SearchHit> for SearchHitDto {
    fn from(hit: SearchHit) -> Self {
        Self {
            package_name: hit.package_name,
            chunk_index: hit.chunk_index,
            text: hit.text,
            vector_score: hit.vector_score,
            lexical_score: hit.lexical_score,
            combined_score: hit.combined_score,
        }
    }
}

/// `POST /api/hybrid-search`
pub async fn hybrid_search(
    State(state): State<SharedState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    match state.retrieval.search(&request.query, SEARCH_TOP_K).await {
        Ok(hits) => {
            let results: Vec<SearchHitDto> = hits.into_iter().map(Into::into).collect();
            Json(json!({ "query": request.query, "results": results })).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

fn gather_stats(
    state: &SharedState,
) -> Result<(u64, u64, u64, Vec<String>), packbay_store::StoreError> {
    let (total_chunks, _) = state.store.chunk_counts()?;
    let responses = state.store.response_cache_len()?;
    let embeddings = state.store.embedding_cache_len()?;
    let packages = state.store.ingested_packages()?;
    Ok((total_chunks, responses, embeddings, packages))
}

/// `GET /api/stats`
pub async fn stats(State(state): State<SharedState>) -> Response {
    match gather_stats(&state) {
        Ok((total_chunks, responses, embeddings, packages)) => Json(json!({
            "totalChunks": total_chunks,
            "cachedResponses": responses,
            "embeddingsCached": embeddings,
            "packages": packages.len(),
            "packageList": packages,
        }))
        .into_response(),
        Err(err) => internal_error(&err),
    }
}

fn gather_vector_stats(
    state: &SharedState,
) -> Result<(u64, u64, u64, u64), packbay_store::StoreError> {
    let (total, embedded) = state.store.chunk_counts()?;
    let embeddings_cached = state.store.embedding_cache_len()?;
    let responses_cached = state.store.response_cache_len()?;
    Ok((total, embedded, embeddings_cached, responses_cached))
}

/// `GET /api/vector-stats`
pub async fn vector_stats(State(state): State<SharedState>) -> Response {
    match gather_vector_stats(&state) {
        Ok((total, embedded, embeddings_cached, responses_cached)) => {
            let coverage = if total == 0 {
                0.0
            } else {
                (embedded as f64 / total as f64 * 10_000.0).round() / 100.0
            };
            Json(json!({
                "totalChunks": total,
                "chunksWithEmbeddings": embedded,
                "coveragePercent": coverage,
                "embeddingsCached": embeddings_cached,
                "responsesCached": responses_cached,
                "vectorOptimizationEnabled": true,
            }))
            .into_response()
        }
        Err(err) => internal_error(&err),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventDto {
    package_name: String,
    version: String,
    kind: &'static str,
    observed_digest: Option<String>,
    expected_digest: Option<String>,
    at: u64,
    details: String,
}

impl From<SecurityEvent> for EventDto {
    fn from(event: SecurityEvent) -> Self {
        Self {
            package_name: event.package_name,
            version: event.version,
            kind: event.kind.as_str(),
            observed_digest: event.observed_digest,
            expected_digest: event.expected_digest,
            at: event.at,
            details: event.details,
        }
    }
}

fn gather_security_stats(
    state: &SharedState,
) -> packbay_core::Result<(packbay_store::VerificationStats, Vec<SecurityEvent>)> {
    let stats = state.audit.stats()?;
    let recent = state.audit.recent(10)?;
    Ok((stats, recent))
}

/// `GET /api/security-stats`
pub async fn security_stats(State(state): State<SharedState>) -> Response {
    match gather_security_stats(&state) {
        Ok((stats, recent)) => {
            let success_rate = if stats.total == 0 {
                "0.00".to_string()
            } else {
                format!("{:.2}", stats.successful as f64 / stats.total as f64 * 100.0)
            };
            let recent: Vec<EventDto> = recent.into_iter().map(Into::into).collect();
            Json(json!({
                "totalVerifications": stats.total,
                "successful": stats.successful,
                "threatsDetected": stats.threats_detected,
                "failures": stats.failures,
                "successRate": success_rate,
                "recentEvents": recent,
            }))
            .into_response()
        }
        Err(err) => internal_error(&err),
    }
}

/// `POST /api/rebuild-embeddings/{package}`
pub async fn rebuild_embeddings(
    State(state): State<SharedState>,
    Path(package): Path<String>,
) -> Response {
    match state.ingest.rebuild_embeddings(&package).await {
        Ok((updated, total)) => {
            Json(json!({ "updated": updated, "total": total })).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrecacheRequest {
    package_name: String,
    version: Option<String>,
}

/// `POST /api/precache` — download, verify, and record a tarball without a
/// waiting client.
pub async fn precache(
    State(state): State<SharedState>,
    Json(request): Json<PrecacheRequest>,
) -> Response {
    let name = request.package_name;

    let doc = match state.registry.fetch_packument(&name).await {
        Ok(doc) => doc,
        Err(err @ ProxyError::PackageNotFound { .. }) => {
            return not_found(&err.to_string());
        }
        Err(err) => return bad_gateway(&err.to_string()),
    };

    let Some(version) = request
        .version
        .or_else(|| latest_version(&doc).map(str::to_string))
    else {
        return not_found(&format!("no latest version known for {name}"));
    };

    let Some(tarball_url) = version_tarball(&doc, &version) else {
        return not_found(&format!("unknown version {name}@{version}"));
    };
    let Some(filename) = tarball_url.rsplit('/').next().map(str::to_string) else {
        return bad_gateway(&format!("malformed tarball URL for {name}@{version}"));
    };
    if !is_valid_filename(&filename) {
        return bad_gateway(&format!("unusable tarball filename: {filename}"));
    }

    match state.coordinator.ensure_cached(&name, &filename).await {
        Ok(outcome) if outcome.already_cached => Json(json!({
            "success": true,
            "cached": true,
            "message": format!("{name}@{version} already cached"),
            "version": version,
        }))
        .into_response(),
        Ok(outcome) => {
            let verified = state
                .store
                .get_package(&name, &version)
                .ok()
                .flatten()
                .is_some_and(|record| record.verified);
            let message = if verified {
                format!("{name}@{version} downloaded and verified")
            } else {
                format!("{name}@{version} downloaded; verification did not pass")
            };
            Json(json!({
                "success": true,
                "message": message,
                "version": version,
                "size": outcome.size,
            }))
            .into_response()
        }
        Err(err) => bad_gateway(&err.to_string()),
    }
}

/// `GET /force-scrape/{package}` — synchronous documentation ingest.
pub async fn force_scrape(
    State(state): State<SharedState>,
    Path(package): Path<String>,
) -> Response {
    match state.ingest.ingest_package(&package).await {
        Ok(report) => Json(json!({
            "success": true,
            "chars": report.chars,
            "package": report.package,
        }))
        .into_response(),
        Err(RagError::Proxy(err @ ProxyError::PackageNotFound { .. })) => {
            not_found(&err.to_string())
        }
        Err(RagError::Proxy(err)) => bad_gateway(&err.to_string()),
        Err(err) => internal_error(&err),
    }
}

/// `GET /api/health`
pub async fn health(State(state): State<SharedState>) -> Response {
    let packages = state.store.ingested_packages().map(|p| p.len()).unwrap_or(0);
    Json(json!({
        "status": "ok",
        "packages": packages,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageDto {
    name: String,
    version: String,
    verified: bool,
    integrity: Option<String>,
    verification_at: u64,
    algorithm: String,
}

impl From<PackageRecord> for PackageDto {
    fn from(record: PackageRecord) -> Self {
        Self {
            name: record.name,
            version: record.version,
            verified: record.verified,
            integrity: record.integrity,
            verification_at: record.verification_at,
            algorithm: record.algorithm,
        }
    }
}

/// `GET /api/packages` — cached tarball records with verification state.
pub async fn packages(State(state): State<SharedState>) -> Response {
    match state.store.list_package_records() {
        Ok(records) => {
            let packages: Vec<PackageDto> = records.into_iter().map(Into::into).collect();
            Json(json!({ "packages": packages })).into_response()
        }
        Err(err) => internal_error(&err),
    }
}

fn not_found(message: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

fn bad_gateway(message: &str) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}

fn internal_error(err: &dyn std::error::Error) -> Response {
    tracing::error!(error = %err, "api request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
