//! Hybrid (vector + lexical) retrieval over documentation chunks.

use crate::caches::EmbeddingCache;
use crate::model::Embedder;
use crate::Result;
use packbay_store::Store;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Ranking knobs; defaults match the hybrid weighting 0.7 vector / 0.3
/// lexical with a 0.3 similarity floor.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub min_similarity: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            min_similarity: 0.3,
            vector_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}

/// One ranked retrieval result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub package_name: String,
    pub chunk_index: u32,
    pub text: String,
    /// Cosine similarity to the query embedding, 0 when the chunk or the
    /// query had no embedding.
    pub vector_score: f32,
    /// 1 when the chunk matched the lexical pass, else 0.
    pub lexical_score: f32,
    pub combined_score: f32,
}

/// Cosine similarity. Mismatched dimensions or a zero denominator yield 0
/// rather than an error.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Tokens worth matching lexically: longer than 3 chars, lowercased.
fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 3)
        .map(str::to_string)
        .collect()
}

/// Semantic + lexical search over the chunk collection.
pub struct RetrievalEngine {
    store: Arc<Store>,
    embedder: Arc<dyn Embedder>,
    embedding_cache: EmbeddingCache,
    options: RetrievalOptions,
}

impl RetrievalEngine {
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn Embedder>,
        embedding_cache: EmbeddingCache,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            embedding_cache,
            options,
        }
    }

    /// Top-`top_k` chunks for `query`.
    ///
    /// When the embedding backend is unavailable the semantic pass is
    /// skipped and lexical hits are ranked through the same combined
    /// formula with a zero vector score.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.query_embedding(query).await;
        let chunks = self.store.all_chunks()?;
        let mut merged: HashMap<(String, u32), SearchHit> = HashMap::new();

        // Semantic pass: all embedded chunks, similarity floor, top-2K.
        if let Some(query_vec) = &query_vec {
            let mut scored: Vec<SearchHit> = chunks
                .iter()
                .filter_map(|chunk| {
                    let embedding = chunk.embedding.as_ref()?;
                    let similarity = cosine_similarity(query_vec, embedding);
                    (similarity >= self.options.min_similarity).then(|| SearchHit {
                        package_name: chunk.package_name.clone(),
                        chunk_index: chunk.chunk_index,
                        text: chunk.text.clone(),
                        vector_score: similarity,
                        lexical_score: 0.0,
                        combined_score: 0.0,
                    })
                })
                .collect();
            scored.sort_by(|a, b| {
                b.vector_score
                    .partial_cmp(&a.vector_score)
                    .unwrap_or(Ordering::Equal)
            });
            scored.truncate(top_k * 2);
            for hit in scored {
                merged.insert((hit.package_name.clone(), hit.chunk_index), hit);
            }
        }

        // Lexical pass: disjunction of the query tokens, up to 2K matches.
        let tokens = query_tokens(query);
        if !tokens.is_empty() {
            let mut matches = 0usize;
            for chunk in &chunks {
                if matches >= top_k * 2 {
                    break;
                }
                let text = chunk.text.to_lowercase();
                if tokens.iter().any(|t| text.contains(t.as_str())) {
                    matches += 1;
                    merged
                        .entry((chunk.package_name.clone(), chunk.chunk_index))
                        .or_insert_with(|| SearchHit {
                            package_name: chunk.package_name.clone(),
                            chunk_index: chunk.chunk_index,
                            text: chunk.text.clone(),
                            vector_score: 0.0,
                            lexical_score: 0.0,
                            combined_score: 0.0,
                        })
                        .lexical_score = 1.0;
                }
            }
        }

        let mut hits: Vec<SearchHit> = merged
            .into_values()
            .map(|mut hit| {
                hit.combined_score = self.options.vector_weight * hit.vector_score
                    + self.options.lexical_weight * hit.lexical_score;
                hit
            })
            .collect();

        hits.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(Ordering::Equal)
                .then(
                    b.vector_score
                        .partial_cmp(&a.vector_score)
                        .unwrap_or(Ordering::Equal),
                )
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Query embedding via cache, then backend; `None` means degraded
    /// (lexical-only) mode.
    async fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.embedding_cache.get(query) {
            return Some(cached);
        }
        match self.embedder.embed(query).await {
            Ok(vector) => {
                self.embedding_cache.put(query, &vector);
                Some(vector)
            }
            Err(err) => {
                tracing::debug!(error = %err, "embedding unavailable, lexical-only retrieval");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use async_trait::async_trait;
    use packbay_store::{now_millis, Chunk};
    use tempfile::tempdir;

    /// Deterministic embedder: a fixed vector per known text, errors
    /// otherwise.
    struct TableEmbedder(Vec<(&'static str, Vec<f32>)>);

    #[async_trait]
    impl Embedder for TableEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ModelError> {
            self.0
                .iter()
                .find(|(t, _)| *t == text)
                .map(|(_, v)| v.clone())
                .ok_or(ModelError::MissingField { field: "embedding" })
        }
    }

    /// Embedder standing in for a dead backend.
    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ModelError> {
            Err(ModelError::Status { status: 503 })
        }
    }

    fn seed_chunk(package: &str, index: u32, text: &str, embedding: Option<Vec<f32>>) -> Chunk {
        Chunk {
            package_name: package.to_string(),
            chunk_index: index,
            text: text.to_string(),
            embedding,
            created_at: now_millis(),
        }
    }

    fn engine(store: Arc<Store>, embedder: Arc<dyn Embedder>) -> RetrievalEngine {
        let cache = EmbeddingCache::new(Arc::clone(&store), 60);
        RetrievalEngine::new(store, embedder, cache, RetrievalOptions::default())
    }

    #[test]
    fn test_cosine_laws() {
        let v = [1.0f32, 2.0, 3.0];
        let w = [3.0f32, 1.0, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&v, &w) - cosine_similarity(&w, &v)).abs() < 1e-6);
        let sim = cosine_similarity(&v, &w);
        assert!((-1.0..=1.0).contains(&sim));
        // Zero vector and mismatched dimensions score 0.
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&v, &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_query_tokens_drop_short_words() {
        assert_eq!(query_tokens("how do I use left-pad?"), vec!["left"]);
        assert_eq!(
            query_tokens("Alpha BRAVO ch"),
            vec!["alpha".to_string(), "bravo".to_string()]
        );
        assert!(query_tokens("a an it").is_empty());
    }

    #[tokio::test]
    async fn test_lexical_match_ranks_first_regardless_of_embeddings() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
        store
            .replace_chunks(
                "alpha-pkg",
                &[seed_chunk("alpha-pkg", 0, "Alpha Bravo Charlie", None)],
            )
            .unwrap();
        store
            .replace_chunks(
                "delta-pkg",
                &[seed_chunk("delta-pkg", 0, "Delta Echo Foxtrot", None)],
            )
            .unwrap();

        let engine = engine(Arc::clone(&store), Arc::new(DownEmbedder));
        let hits = engine.search("bravo", 5).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].package_name, "alpha-pkg");
        assert_eq!(hits[0].lexical_score, 1.0);
        assert_eq!(hits[0].vector_score, 0.0);
        assert!(hits[0].combined_score > 0.0);
    }

    #[tokio::test]
    async fn test_semantic_pass_ranks_by_cosine() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
        store
            .replace_chunks(
                "near-pkg",
                &[seed_chunk("near-pkg", 0, "vector math utilities", Some(vec![1.0, 0.0, 0.0]))],
            )
            .unwrap();
        store
            .replace_chunks(
                "far-pkg",
                &[seed_chunk("far-pkg", 0, "an http framework", Some(vec![0.0, 1.0, 0.0]))],
            )
            .unwrap();
        store
            .replace_chunks(
                "plain-pkg",
                &[seed_chunk("plain-pkg", 0, "no embedding here", None)],
            )
            .unwrap();

        let embedder = TableEmbedder(vec![("geometry", vec![0.9, 0.1, 0.0])]);
        let engine = engine(Arc::clone(&store), Arc::new(embedder));
        let hits = engine.search("geometry", 5).await.unwrap();

        assert_eq!(hits.len(), 1, "only near-pkg clears the 0.3 floor: {hits:?}");
        assert_eq!(hits[0].package_name, "near-pkg");
        assert!(hits[0].vector_score > 0.9);
    }

    #[tokio::test]
    async fn test_hybrid_merge_prefers_both_signals() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
        // Both chunks embed identically; only one matches lexically.
        store
            .replace_chunks(
                "both-pkg",
                &[seed_chunk("both-pkg", 0, "tensor operations", Some(vec![1.0, 0.0]))],
            )
            .unwrap();
        store
            .replace_chunks(
                "vec-only-pkg",
                &[seed_chunk("vec-only-pkg", 0, "matrix helpers", Some(vec![1.0, 0.0]))],
            )
            .unwrap();

        let embedder = TableEmbedder(vec![("tensor", vec![1.0, 0.0])]);
        let engine = engine(Arc::clone(&store), Arc::new(embedder));
        let hits = engine.search("tensor", 5).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].package_name, "both-pkg");
        assert!(hits[0].combined_score > hits[1].combined_score);
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
        let engine = engine(store, Arc::new(DownEmbedder));
        assert!(engine.search("  ", 5).await.unwrap().is_empty());
        assert!(engine.search("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_embedding_is_cached() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db")).unwrap());
        let embedder = TableEmbedder(vec![("cached query", vec![0.1, 0.2])]);
        let engine = engine(Arc::clone(&store), Arc::new(embedder));

        let _ = engine.search("cached query", 5).await.unwrap();
        assert_eq!(store.embedding_cache_len().unwrap(), 1);
    }
}
