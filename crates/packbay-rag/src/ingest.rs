//! Documentation ingest pipeline: packument → README → chunks → embeddings.

use crate::caches::EmbeddingCache;
use crate::chunker::Chunker;
use crate::model::Embedder;
use crate::Result;
use packbay_core::meta::readme_text;
use packbay_core::RegistryClient;
use packbay_store::{now_millis, Chunk, Store};
use serde::Serialize;
use std::sync::Arc;

/// Documentation longer than this is truncated before chunking.
pub const MAX_DOC_CHARS: usize = 5_000;

/// What one ingest run produced.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub package: String,
    pub chars: usize,
    pub chunks: usize,
    pub embedded: usize,
}

/// Scrape → chunk → embed → persist. Re-ingesting a package replaces its
/// chunk set atomically, so the pipeline is idempotent from the caller's
/// perspective.
pub struct IngestPipeline {
    client: RegistryClient,
    store: Arc<Store>,
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    embedding_cache: EmbeddingCache,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        client: RegistryClient,
        store: Arc<Store>,
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        embedding_cache: EmbeddingCache,
    ) -> Self {
        Self {
            client,
            store,
            chunker,
            embedder,
            embedding_cache,
        }
    }

    /// Ingest one package's documentation.
    pub async fn ingest_package(&self, name: &str) -> Result<IngestReport> {
        let doc = self.client.fetch_packument(name).await?;
        let text: String = readme_text(&doc)
            .unwrap_or_default()
            .chars()
            .take(MAX_DOC_CHARS)
            .collect();

        let parts = self.chunker.chunk(&text);
        let mut chunks = Vec::with_capacity(parts.len());
        let mut embedded = 0usize;
        for (index, part) in parts.into_iter().enumerate() {
            let embedding = self.embed_or_none(&part).await;
            if embedding.is_some() {
                embedded += 1;
            }
            chunks.push(Chunk {
                package_name: name.to_string(),
                chunk_index: index as u32,
                text: part,
                embedding,
                created_at: now_millis(),
            });
        }

        self.store.replace_chunks(name, &chunks)?;
        tracing::info!(
            package = name,
            chars = text.chars().count(),
            chunks = chunks.len(),
            embedded,
            "documentation ingested"
        );

        Ok(IngestReport {
            package: name.to_string(),
            chars: text.chars().count(),
            chunks: chunks.len(),
            embedded,
        })
    }

    /// Re-embed the chunks of `name` that have no embedding. Returns
    /// `(updated, total)`.
    pub async fn rebuild_embeddings(&self, name: &str) -> Result<(u64, u64)> {
        let chunks = self.store.chunks_for_package(name)?;
        let total = chunks.len() as u64;
        let mut updated = 0u64;

        for chunk in chunks {
            if chunk.embedding.is_some() {
                continue;
            }
            if let Some(vector) = self.embed_or_none(&chunk.text).await {
                if self
                    .store
                    .set_chunk_embedding(name, chunk.chunk_index, vector)?
                {
                    updated += 1;
                }
            }
        }
        Ok((updated, total))
    }

    /// A failed embedding is an absent embedding, never an ingest error.
    async fn embed_or_none(&self, text: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.embedding_cache.get(text) {
            return Some(cached);
        }
        match self.embedder.embed(text).await {
            Ok(vector) => {
                self.embedding_cache.put(text, &vector);
                Some(vector)
            }
            Err(err) => {
                tracing::debug!(error = %err, "embedding backend unavailable during ingest");
                None
            }
        }
    }
}
