//! Content-addressed TTL caches for embeddings and chat answers.
//!
//! Both caches key by a blake3 digest of the input text and only ever
//! store bytes they were given. Store failures are logged and treated as
//! misses: a broken cache degrades to recomputation, never to an error.

use packbay_core::hash::content_digest;
use packbay_store::{now_millis, EmbeddingEntry, ResponseEntry, Store};
use std::sync::Arc;

/// Short-TTL memoization of embedding vectors (default 1 h).
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    store: Arc<Store>,
    ttl_millis: u64,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(store: Arc<Store>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl_millis: ttl_secs * 1_000,
        }
    }

    /// Cached vector for `text`, if present and unexpired.
    #[must_use]
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        match self.store.get_embedding(&content_digest(text)) {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(error = %err, "embedding cache read failed");
                None
            }
        }
    }

    pub fn put(&self, text: &str, embedding: &[f32]) {
        let now = now_millis();
        let entry = EmbeddingEntry {
            text_digest: content_digest(text),
            embedding: embedding.to_vec(),
            created_at: now,
            expires_at: now + self.ttl_millis,
        };
        if let Err(err) = self.store.put_embedding(&entry) {
            tracing::warn!(error = %err, "embedding cache write failed");
        }
    }
}

/// Long-TTL memoization of chat answers (default 24 h).
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<Store>,
    ttl_millis: u64,
}

impl ResponseCache {
    #[must_use]
    pub fn new(store: Arc<Store>, ttl_secs: u64) -> Self {
        Self {
            store,
            ttl_millis: ttl_secs * 1_000,
        }
    }

    /// Cached answer for `question`, if present and unexpired.
    #[must_use]
    pub fn get(&self, question: &str) -> Option<String> {
        match self.store.get_response(&content_digest(question)) {
            Ok(hit) => hit.map(|entry| entry.answer),
            Err(err) => {
                tracing::warn!(error = %err, "response cache read failed");
                None
            }
        }
    }

    pub fn put(&self, question: &str, answer: &str) {
        let entry = ResponseEntry {
            question_digest: content_digest(question),
            answer: answer.to_string(),
            expires_at: now_millis() + self.ttl_millis,
        };
        if let Err(err) = self.store.put_response(&entry) {
            tracing::warn!(error = %err, "response cache write failed");
        }
    }
}
