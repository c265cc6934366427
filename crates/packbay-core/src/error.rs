//! Proxy engine error types.

use thiserror::Error;

/// Error type for proxy engine operations.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON from upstream: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] packbay_store::StoreError),

    #[error("invalid registry URL '{url}': {reason}")]
    InvalidRegistryUrl { url: String, reason: String },

    #[error("package not found upstream: {name}")]
    PackageNotFound { name: String },

    #[error("version {version} of {name} not found upstream")]
    VersionNotFound { name: String, version: String },

    #[error("upstream unreachable and no cached copy of '{name}'")]
    UpstreamUnreachable { name: String },

    #[error("upstream returned status {status} for {url}")]
    UpstreamStatus { status: u16, url: String },

    #[error("no upstream integrity declared for {name}@{version}")]
    MissingIntegrity { name: String, version: String },

    #[error("invalid tarball filename: {filename}")]
    InvalidFilename { filename: String },

    #[error("unsupported digest algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    #[error("download of {filename} failed: {reason}")]
    DownloadFailed { filename: String, reason: String },
}
