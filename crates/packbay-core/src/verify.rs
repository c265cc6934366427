//! Integrity verification of downloaded tarballs.
//!
//! Verification compares the streamed digest of the cached file against the
//! integrity string the upstream registry declares for that exact version.
//! The three outcomes map one-to-one onto audit events: match → `success`,
//! mismatch → `threat_detected` (and the file is deleted), anything else →
//! `failure`. No path panics; callers always receive an outcome value.

use crate::audit::AuditLog;
use crate::client::RegistryClient;
use crate::error::ProxyError;
use crate::hash::{digest_file, Algorithm};
use crate::meta::version_integrity;
use crate::Result;
use packbay_store::{now_millis, PackageRecord, Store};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Result of one verification attempt.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub threat: bool,
    /// Digest computed over the cached file, when hashing succeeded.
    pub digest: Option<String>,
    /// Upstream-declared integrity, when present.
    pub expected: Option<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

enum Comparison {
    Match {
        digest: String,
        algorithm: Algorithm,
    },
    Mismatch {
        observed: String,
        expected: String,
        algorithm: Algorithm,
    },
}

/// Orchestrates integrity checks and records their outcomes.
#[derive(Debug, Clone)]
pub struct IntegrityVerifier {
    client: RegistryClient,
    store: Arc<Store>,
    audit: AuditLog,
}

/// An upstream integrity field may carry several space-separated entries;
/// the first is the strongest by registry convention.
fn first_integrity_token(integrity: &str) -> &str {
    integrity.split_whitespace().next().unwrap_or(integrity)
}

impl IntegrityVerifier {
    #[must_use]
    pub fn new(client: RegistryClient, store: Arc<Store>, audit: AuditLog) -> Self {
        Self { client, store, audit }
    }

    /// Verify the tarball at `path` against upstream metadata, write exactly
    /// one audit event, and upsert the package record.
    pub async fn verify_download(&self, name: &str, version: &str, path: &Path) -> VerifyOutcome {
        let started = Instant::now();
        match self.compare(name, version, path).await {
            Ok(Comparison::Match { digest, algorithm }) => {
                if let Err(err) = self.audit.record_success(name, version, &digest) {
                    tracing::error!(package = name, error = %err, "failed to write audit event");
                }
                self.upsert_record(name, version, Some(&digest), path, true, algorithm);
                VerifyOutcome {
                    verified: true,
                    threat: false,
                    digest: Some(digest.clone()),
                    expected: Some(digest),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Ok(Comparison::Mismatch {
                observed,
                expected,
                algorithm,
            }) => {
                tracing::warn!(
                    package = name,
                    version,
                    observed = %observed,
                    expected = %expected,
                    "integrity mismatch, deleting cached tarball"
                );
                if let Err(err) = std::fs::remove_file(path) {
                    tracing::error!(path = %path.display(), error = %err, "failed to delete corrupt tarball");
                }
                if let Err(err) = self.audit.record_threat(name, version, &observed, &expected) {
                    tracing::error!(package = name, error = %err, "failed to write audit event");
                }
                self.upsert_record(name, version, Some(&expected), path, false, algorithm);
                VerifyOutcome {
                    verified: false,
                    threat: true,
                    digest: Some(observed),
                    expected: Some(expected),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Err(err) => {
                let details = err.to_string();
                if let Err(audit_err) = self.audit.record_failure(name, version, &details) {
                    tracing::error!(package = name, error = %audit_err, "failed to write audit event");
                }
                self.upsert_record(name, version, None, path, false, Algorithm::Sha512);
                VerifyOutcome {
                    verified: false,
                    threat: false,
                    digest: None,
                    expected: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    error: Some(details),
                }
            }
        }
    }

    async fn compare(&self, name: &str, version: &str, path: &Path) -> Result<Comparison> {
        let doc = self.client.fetch_packument(name).await?;
        if doc
            .get("versions")
            .and_then(|v| v.get(version))
            .is_none()
        {
            return Err(ProxyError::VersionNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        let expected = version_integrity(&doc, version)
            .map(first_integrity_token)
            .map(str::to_string)
            .ok_or_else(|| ProxyError::MissingIntegrity {
                name: name.to_string(),
                version: version.to_string(),
            })?;

        let algorithm = Algorithm::from_integrity(&expected)?;
        let observed = digest_file(path, algorithm).await?;

        if observed == expected {
            Ok(Comparison::Match {
                digest: observed,
                algorithm,
            })
        } else {
            Ok(Comparison::Mismatch {
                observed,
                expected,
                algorithm,
            })
        }
    }

    fn upsert_record(
        &self,
        name: &str,
        version: &str,
        integrity: Option<&str>,
        path: &Path,
        verified: bool,
        algorithm: Algorithm,
    ) {
        let record = PackageRecord {
            name: name.to_string(),
            version: version.to_string(),
            integrity: integrity.map(str::to_string),
            cached_path: path.to_string_lossy().into_owned(),
            verified,
            verification_at: now_millis(),
            algorithm: algorithm.as_str().to_string(),
        };
        if let Err(err) = self.store.put_package(&record) {
            tracing::error!(package = name, version, error = %err, "failed to persist package record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_integrity_token_prefers_leading_entry() {
        assert_eq!(
            first_integrity_token("sha512-aaa sha1-bbb"),
            "sha512-aaa"
        );
        assert_eq!(first_integrity_token("sha512-solo"), "sha512-solo");
    }
}
