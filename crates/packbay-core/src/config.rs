//! Runtime configuration for the proxy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default upstream registry.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Default model backend (Ollama-compatible API).
pub const DEFAULT_MODEL_BACKEND: &str = "http://127.0.0.1:11434";

/// Runtime configuration shared by every component.
///
/// Populated by the CLI (flags with env-var fallbacks) and passed by
/// reference at startup; components copy out what they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream registry base URL.
    pub registry_url: String,

    /// Directory holding cached tarballs and metadata documents.
    pub cache_dir: PathBuf,

    /// Listen address for the HTTP surface.
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Path of the embedded database.
    pub db_path: PathBuf,

    /// Embedding/generation backend base URL.
    pub model_backend_url: String,

    /// Model identifier for embeddings.
    pub embed_model: String,

    /// Model identifier for answer generation.
    pub generation_model: String,

    /// Backend request timeout in seconds.
    pub backend_timeout_secs: u64,

    /// Embedding cache TTL in seconds.
    pub embedding_ttl_secs: u64,

    /// Response cache TTL in seconds.
    pub response_ttl_secs: u64,

    /// Chunk window size in chars.
    pub chunk_size: usize,

    /// Chunk window overlap in chars.
    pub chunk_overlap: usize,

    /// Minimum cosine similarity for the semantic pass.
    pub min_similarity: f32,

    /// Weight of the vector score in hybrid ranking.
    pub vector_weight: f32,

    /// Weight of the lexical score in hybrid ranking.
    pub lexical_weight: f32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            registry_url: DEFAULT_REGISTRY.to_string(),
            cache_dir: PathBuf::from("./cache"),
            host: "0.0.0.0".to_string(),
            port: 4873,
            db_path: PathBuf::from("./packbay-db"),
            model_backend_url: DEFAULT_MODEL_BACKEND.to_string(),
            embed_model: "nomic-embed-text".to_string(),
            generation_model: "llama3.2".to_string(),
            backend_timeout_secs: 30,
            embedding_ttl_secs: 3_600,
            response_ttl_secs: 86_400,
            chunk_size: 800,
            chunk_overlap: 100,
            min_similarity: 0.3,
            vector_weight: 0.7,
            lexical_weight: 0.3,
        }
    }
}
