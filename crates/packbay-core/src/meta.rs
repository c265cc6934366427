//! Package metadata cache with tarball URL rewriting.
//!
//! Metadata documents (packuments) are stored on disk keyed by package
//! name, with every `versions[*].dist.tarball` URL rewritten to point at
//! this proxy. The rewrite happens again on every cached read against the
//! live request host, because the proxy's advertised address may have
//! changed since the document was persisted.

use crate::client::{encode_name, RegistryClient};
use crate::error::ProxyError;
use crate::Result;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

/// On-disk store of rewritten packuments.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    cache_dir: PathBuf,
}

/// Rewrite every `versions[*].dist.tarball` URL so its scheme and authority
/// point at `host` (for example `192.168.1.20:4873`).
///
/// Only the filename tail of the original URL is kept, so applying the
/// rewrite twice yields the same result.
pub fn rewrite_tarball_urls(doc: &mut Value, name: &str, host: &str) {
    let encoded = encode_name(name);
    let Some(versions) = doc.get_mut("versions").and_then(Value::as_object_mut) else {
        return;
    };
    for version in versions.values_mut() {
        let Some(tarball) = version
            .get_mut("dist")
            .and_then(|d| d.get_mut("tarball"))
        else {
            continue;
        };
        let Some(url) = tarball.as_str() else {
            continue;
        };
        let Some(filename) = url.rsplit('/').next() else {
            continue;
        };
        *tarball = Value::String(format!("http://{host}/{encoded}/-/{filename}"));
    }
}

impl MetadataCache {
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Path of the persisted document for `name`.
    #[must_use]
    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", encode_name(name)))
    }

    /// Resolve metadata for `name`, rewriting tarball URLs against `host`.
    ///
    /// Fresh path: fetch upstream, rewrite, persist, return. Offline path:
    /// if upstream is unreachable but a persisted document exists, re-rewrite
    /// it against the current host and return it. A definitive upstream 404
    /// is propagated as-is (the package does not exist; the cache cannot
    /// help).
    pub async fn resolve(
        &self,
        client: &RegistryClient,
        name: &str,
        host: &str,
    ) -> Result<Value> {
        match client.fetch_packument(name).await {
            Ok(mut doc) => {
                rewrite_tarball_urls(&mut doc, name, host);
                if let Err(err) = self.save(name, &doc) {
                    tracing::warn!(package = name, error = %err, "failed to persist metadata");
                }
                Ok(doc)
            }
            Err(err @ ProxyError::PackageNotFound { .. }) => Err(err),
            Err(err) => {
                if let Some(mut doc) = self.load(name) {
                    tracing::debug!(package = name, "serving cached metadata, upstream unreachable");
                    rewrite_tarball_urls(&mut doc, name, host);
                    return Ok(doc);
                }
                tracing::warn!(package = name, error = %err, "upstream unreachable with no cache");
                Err(ProxyError::UpstreamUnreachable {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Load the persisted document, if any.
    #[must_use]
    pub fn load(&self, name: &str) -> Option<Value> {
        let content = fs::read_to_string(self.metadata_path(name)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Persist a document atomically via a temp file rename.
    pub fn save(&self, name: &str, doc: &Value) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.metadata_path(name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(doc)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// The `latest` dist-tag of a packument.
#[must_use]
pub fn latest_version(doc: &Value) -> Option<&str> {
    doc.get("dist-tags")?.get("latest")?.as_str()
}

/// The declared integrity string for a specific version.
#[must_use]
pub fn version_integrity<'a>(doc: &'a Value, version: &str) -> Option<&'a str> {
    doc.get("versions")?
        .get(version)?
        .get("dist")?
        .get("integrity")?
        .as_str()
}

/// The tarball URL for a specific version.
#[must_use]
pub fn version_tarball<'a>(doc: &'a Value, version: &str) -> Option<&'a str> {
    doc.get("versions")?
        .get(version)?
        .get("dist")?
        .get("tarball")?
        .as_str()
}

/// The README text of a packument, falling back to the short description.
#[must_use]
pub fn readme_text(doc: &Value) -> Option<&str> {
    doc.get("readme")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| doc.get("description").and_then(Value::as_str))
}
