//! npm-compatible proxy routes.

use crate::state::SharedState;
use axum::body::Body;
use axum::extract::{Host, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use packbay_core::flight::{stream_file, TarballDelivery};
use packbay_core::tarball::is_valid_filename;
use packbay_core::ProxyError;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;

/// `GET /{package}` — rewritten upstream metadata, fresh or cached.
pub async fn metadata(
    State(state): State<SharedState>,
    Host(host): Host,
    Path(package): Path<String>,
) -> Response {
    match state.metadata.resolve(&state.registry, &package, &host).await {
        Ok(doc) => Json(doc).into_response(),
        Err(err) => proxy_error(&err),
    }
}

/// `GET /{package}/-/{filename}` — stream the tarball from cache or a live
/// single-flight download.
pub async fn tarball(
    State(state): State<SharedState>,
    Path((package, filename)): Path<(String, String)>,
) -> Response {
    if !is_valid_filename(&filename) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid tarball filename: {filename}") })),
        )
            .into_response();
    }

    match state.coordinator.deliver(&package, &filename).await {
        Ok(TarballDelivery::File(path)) => tarball_response(ReceiverStream::new(stream_file(path))),
        Ok(TarballDelivery::Stream(rx)) => tarball_response(ReceiverStream::new(rx)),
        Err(err) => proxy_error(&err),
    }
}

fn tarball_response(
    stream: ReceiverStream<std::io::Result<bytes::Bytes>>,
) -> Response {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Map engine errors onto proxy status codes: NotFound → 404, upstream
/// trouble → 502, local faults → 500.
fn proxy_error(err: &ProxyError) -> Response {
    let status = match err {
        ProxyError::PackageNotFound { .. } | ProxyError::VersionNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        ProxyError::UpstreamStatus { status: 404, .. } => StatusCode::NOT_FOUND,
        ProxyError::UpstreamUnreachable { .. }
        | ProxyError::UpstreamStatus { .. }
        | ProxyError::Http(_)
        | ProxyError::DownloadFailed { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
