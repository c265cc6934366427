//! Persisted record types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Outcome record for one downloaded tarball version.
///
/// Created on every completed download, successful or not. `verified: true`
/// means the on-disk digest matched the upstream-declared integrity at
/// `verification_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    /// Upstream-declared integrity string (`<algo>-<base64>`), if any.
    pub integrity: Option<String>,
    /// Absolute path of the cached tarball file.
    pub cached_path: String,
    pub verified: bool,
    /// Epoch millis of the verification attempt.
    pub verification_at: u64,
    /// Digest algorithm used for verification (e.g. `sha512`).
    pub algorithm: String,
}

impl PackageRecord {
    /// Storage key: `name@version`.
    #[must_use]
    pub fn key(name: &str, version: &str) -> String {
        format!("{name}@{version}")
    }
}

/// One retrieval unit of a package's documentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub package_name: String,
    pub chunk_index: u32,
    pub text: String,
    /// Absent when the embedding backend was unavailable at ingest time;
    /// the chunk is still searchable lexically.
    pub embedding: Option<Vec<f32>>,
    pub created_at: u64,
}

/// Memoized chat answer, content-addressed by the question digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    pub question_digest: String,
    pub answer: String,
    pub expires_at: u64,
}

/// Memoized embedding vector, content-addressed by the text digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub text_digest: String,
    pub embedding: Vec<f32>,
    pub created_at: u64,
    pub expires_at: u64,
}

/// Verification outcome category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Success,
    ThreatDetected,
    Failure,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ThreatDetected => "threat_detected",
            Self::Failure => "failure",
        }
    }
}

/// Append-only audit record of one verification attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub package_name: String,
    pub version: String,
    pub kind: EventKind,
    pub observed_digest: Option<String>,
    pub expected_digest: Option<String>,
    /// Epoch millis.
    pub at: u64,
    pub details: String,
}
