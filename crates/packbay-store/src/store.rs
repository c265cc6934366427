//! Typed collections over a sled database.

use crate::records::{
    now_millis, Chunk, EmbeddingEntry, EventKind, PackageRecord, ResponseEntry, SecurityEvent,
};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

/// Aggregate verification counters derived from the audit log.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct VerificationStats {
    pub total: u64,
    pub successful: u64,
    pub threats_detected: u64,
    pub failures: u64,
}

/// Handle over all five persisted collections.
///
/// Cheap to clone via `Arc`; sled trees are internally synchronized, so the
/// store is shared freely across request handlers.
#[derive(Debug)]
pub struct Store {
    packages: sled::Tree,
    chunks: sled::Tree,
    embedding_cache: sled::Tree,
    response_cache: sled::Tree,
    security_events: sled::Tree,
    /// Disambiguates events appended within the same millisecond.
    event_seq: AtomicU32,
}

/// `package_name` cannot contain NUL, so `name \0 index` keys give unique,
/// prefix-scannable addressing per `(package_name, chunk_index)`.
fn chunk_key(package: &str, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(package.len() + 5);
    key.extend_from_slice(package.as_bytes());
    key.push(0);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn chunk_prefix(package: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(package.len() + 1);
    prefix.extend_from_slice(package.as_bytes());
    prefix.push(0);
    prefix
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            packages: db.open_tree("packages")?,
            chunks: db.open_tree("chunks")?,
            embedding_cache: db.open_tree("embedding_cache")?,
            response_cache: db.open_tree("response_cache")?,
            security_events: db.open_tree("security_events")?,
            event_seq: AtomicU32::new(0),
        })
    }

    // ---- packages ----

    /// Insert or overwrite the record for `name@version`.
    pub fn put_package(&self, record: &PackageRecord) -> Result<()> {
        let key = PackageRecord::key(&record.name, &record.version);
        self.packages.insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn get_package(&self, name: &str, version: &str) -> Result<Option<PackageRecord>> {
        let key = PackageRecord::key(name, version);
        match self.packages.get(key.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_package_records(&self) -> Result<Vec<PackageRecord>> {
        let mut records = Vec::new();
        for entry in self.packages.iter() {
            let (_, raw) = entry?;
            records.push(serde_json::from_slice(&raw)?);
        }
        Ok(records)
    }

    /// Whether any verified record points at a cached tarball with this
    /// filename. Used by startup reclamation.
    pub fn has_verified_tarball(&self, filename: &str) -> Result<bool> {
        for entry in self.packages.iter() {
            let (_, raw) = entry?;
            let record: PackageRecord = serde_json::from_slice(&raw)?;
            if record.verified
                && Path::new(&record.cached_path)
                    .file_name()
                    .is_some_and(|f| f.to_string_lossy() == filename)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- chunks ----

    /// Replace the whole chunk set for a package: old chunks deleted and new
    /// ones inserted in a single batch, so readers never observe a mix.
    pub fn replace_chunks(&self, package: &str, chunks: &[Chunk]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for entry in self.chunks.scan_prefix(chunk_prefix(package)) {
            let (key, _) = entry?;
            batch.remove(key);
        }
        for chunk in chunks {
            batch.insert(
                chunk_key(package, chunk.chunk_index),
                serde_json::to_vec(chunk)?,
            );
        }
        self.chunks.apply_batch(batch)?;
        Ok(())
    }

    pub fn chunks_for_package(&self, package: &str) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for entry in self.chunks.scan_prefix(chunk_prefix(package)) {
            let (_, raw) = entry?;
            chunks.push(serde_json::from_slice(&raw)?);
        }
        Ok(chunks)
    }

    /// All chunks across all packages, in key order.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::new();
        for entry in self.chunks.iter() {
            let (_, raw) = entry?;
            chunks.push(serde_json::from_slice(&raw)?);
        }
        Ok(chunks)
    }

    /// Overwrite one chunk's embedding in place. Returns false when the
    /// chunk does not exist.
    pub fn set_chunk_embedding(
        &self,
        package: &str,
        index: u32,
        embedding: Vec<f32>,
    ) -> Result<bool> {
        let key = chunk_key(package, index);
        let Some(raw) = self.chunks.get(&key)? else {
            return Ok(false);
        };
        let mut chunk: Chunk = serde_json::from_slice(&raw)?;
        chunk.embedding = Some(embedding);
        self.chunks.insert(key, serde_json::to_vec(&chunk)?)?;
        Ok(true)
    }

    /// `(total chunks, chunks with an embedding)`.
    pub fn chunk_counts(&self) -> Result<(u64, u64)> {
        let mut total = 0u64;
        let mut embedded = 0u64;
        for entry in self.chunks.iter() {
            let (_, raw) = entry?;
            let chunk: Chunk = serde_json::from_slice(&raw)?;
            total += 1;
            if chunk.embedding.is_some() {
                embedded += 1;
            }
        }
        Ok((total, embedded))
    }

    /// Distinct package names present in the chunk collection, sorted.
    pub fn ingested_packages(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for entry in self.chunks.iter() {
            let (key, _) = entry?;
            if let Some(end) = key.iter().position(|b| *b == 0) {
                names.insert(String::from_utf8_lossy(&key[..end]).into_owned());
            }
        }
        Ok(names.into_iter().collect())
    }

    // ---- embedding cache ----

    /// Unexpired cached embedding for `text_digest`, if any. Expired entries
    /// are deleted on the way out.
    pub fn get_embedding(&self, text_digest: &str) -> Result<Option<Vec<f32>>> {
        let Some(raw) = self.embedding_cache.get(text_digest.as_bytes())? else {
            return Ok(None);
        };
        let entry: EmbeddingEntry = serde_json::from_slice(&raw)?;
        if entry.expires_at <= now_millis() {
            self.embedding_cache.remove(text_digest.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(entry.embedding))
    }

    pub fn put_embedding(&self, entry: &EmbeddingEntry) -> Result<()> {
        self.embedding_cache
            .insert(entry.text_digest.as_bytes(), serde_json::to_vec(entry)?)?;
        Ok(())
    }

    /// Count of unexpired embedding-cache entries.
    pub fn embedding_cache_len(&self) -> Result<u64> {
        let now = now_millis();
        let mut count = 0u64;
        for entry in self.embedding_cache.iter() {
            let (_, raw) = entry?;
            let entry: EmbeddingEntry = serde_json::from_slice(&raw)?;
            if entry.expires_at > now {
                count += 1;
            }
        }
        Ok(count)
    }

    // ---- response cache ----

    pub fn get_response(&self, question_digest: &str) -> Result<Option<ResponseEntry>> {
        let Some(raw) = self.response_cache.get(question_digest.as_bytes())? else {
            return Ok(None);
        };
        let entry: ResponseEntry = serde_json::from_slice(&raw)?;
        if entry.expires_at <= now_millis() {
            self.response_cache.remove(question_digest.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn put_response(&self, entry: &ResponseEntry) -> Result<()> {
        self.response_cache
            .insert(entry.question_digest.as_bytes(), serde_json::to_vec(entry)?)?;
        Ok(())
    }

    pub fn response_cache_len(&self) -> Result<u64> {
        let now = now_millis();
        let mut count = 0u64;
        for entry in self.response_cache.iter() {
            let (_, raw) = entry?;
            let entry: ResponseEntry = serde_json::from_slice(&raw)?;
            if entry.expires_at > now {
                count += 1;
            }
        }
        Ok(count)
    }

    // ---- security events ----

    /// Append one audit event. Events are keyed by wall clock (epoch millis,
    /// big-endian) plus an in-process sequence number, so iteration order is
    /// insertion order even within a millisecond.
    pub fn append_event(&self, event: &SecurityEvent) -> Result<()> {
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        let mut key = [0u8; 12];
        key[..8].copy_from_slice(&event.at.to_be_bytes());
        key[8..].copy_from_slice(&seq.to_be_bytes());
        self.security_events.insert(key, serde_json::to_vec(event)?)?;
        Ok(())
    }

    /// The `limit` most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let mut events = Vec::with_capacity(limit);
        for entry in self.security_events.iter().rev().take(limit) {
            let (_, raw) = entry?;
            events.push(serde_json::from_slice(&raw)?);
        }
        Ok(events)
    }

    pub fn verification_stats(&self) -> Result<VerificationStats> {
        let mut stats = VerificationStats::default();
        for entry in self.security_events.iter() {
            let (_, raw) = entry?;
            let event: SecurityEvent = serde_json::from_slice(&raw)?;
            stats.total += 1;
            match event.kind {
                EventKind::Success => stats.successful += 1,
                EventKind::ThreatDetected => stats.threats_detected += 1,
                EventKind::Failure => stats.failures += 1,
            }
        }
        Ok(stats)
    }

    // ---- maintenance ----

    /// Physically remove expired cache entries. Returns how many were
    /// reclaimed.
    pub fn sweep_expired(&self) -> Result<u64> {
        let now = now_millis();
        let mut removed = 0u64;
        for tree in [&self.embedding_cache, &self.response_cache] {
            let mut stale = Vec::new();
            for entry in tree.iter() {
                let (key, raw) = entry?;
                let expires_at = serde_json::from_slice::<serde_json::Value>(&raw)
                    .ok()
                    .and_then(|v| v.get("expires_at").and_then(serde_json::Value::as_u64))
                    .unwrap_or(0);
                if expires_at <= now {
                    stale.push(key);
                }
            }
            for key in stale {
                tree.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
