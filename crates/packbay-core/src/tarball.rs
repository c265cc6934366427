//! Tarball filenames and cache-directory layout.
//!
//! The cache directory is flat: `{filename}.tgz` tarballs next to
//! `{package}.json` metadata documents, with `.part` temporaries for
//! writes in progress.

use crate::Result;
use packbay_store::Store;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Version capture: the last `-` followed by a dotted `X.Y.Z` triple, with
/// an optional pre-release (`-rc.1`) and build (`+build.5`) tail, up to the
/// `.tgz` suffix. Requiring the full triple keeps digit-bearing package
/// names like `base-64-0.1.0.tgz` parsing as (`base-64`, `0.1.0`).
fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-([0-9]+\.[0-9]+\.[0-9]+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)\.tgz$")
            .unwrap()
    })
}

/// Whether `filename` is a plausible tarball name safe to join onto the
/// cache directory (no separators, no traversal, `.tgz` suffix).
#[must_use]
pub fn is_valid_filename(filename: &str) -> bool {
    filename.len() > ".tgz".len()
        && filename.ends_with(".tgz")
        && !filename.starts_with('.')
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
}

/// The version suffix of a tarball filename, if one is present.
#[must_use]
pub fn version_from_filename(filename: &str) -> Option<String> {
    version_regex()
        .captures(filename)
        .map(|caps| caps[1].to_string())
}

/// Split a tarball filename into its name part and version
/// (`left-pad-1.3.0.tgz` → `("left-pad", "1.3.0")`). Note the name part of
/// a scoped package's tarball is the bare package name without the scope.
#[must_use]
pub fn split_filename(filename: &str) -> Option<(String, String)> {
    let caps = version_regex().captures(filename)?;
    let matched = caps.get(0)?;
    let name = &filename[..matched.start()];
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), caps[1].to_string()))
}

/// Final on-disk path for a tarball.
#[must_use]
pub fn tarball_path(cache_dir: &Path, filename: &str) -> PathBuf {
    cache_dir.join(filename)
}

/// Temporary path used while a tarball is being written. The rename from
/// this path to [`tarball_path`] is the commit point readers rely on.
#[must_use]
pub fn partial_path(cache_dir: &Path, filename: &str) -> PathBuf {
    cache_dir.join(format!("{filename}.part"))
}

/// Delete leftovers from interrupted runs: `.part` temporaries and any
/// tarball without a verified package record. Returns how many files were
/// removed.
pub fn reclaim_cache_dir(cache_dir: &Path, store: &Store) -> Result<u64> {
    let mut removed = 0u64;
    let entries = match std::fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let stale = if name.ends_with(".part") {
            true
        } else if name.ends_with(".tgz") {
            !store.has_verified_tarball(&name)?
        } else {
            false
        };

        if stale {
            tracing::info!(file = %name, "reclaiming unverified cache file");
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
