//! Retrieval-augmented documentation store.
//!
//! Ingests package READMEs into overlapping text chunks with optional
//! embeddings, serves hybrid (vector + lexical) retrieval over them, and
//! answers questions through a generation backend with response caching.
//!
//! The embedding function enters retrieval as an injected [`Embedder`]
//! trait object, so the retrieval engine carries no dependency on the
//! model client and keeps working (lexically) when the backend is down.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod caches;
pub mod chat;
pub mod chunker;
pub mod ingest;
pub mod model;
pub mod retrieval;

pub use caches::{EmbeddingCache, ResponseCache};
pub use chat::{ChatAnswer, ChatEngine};
pub use chunker::Chunker;
pub use ingest::{IngestPipeline, IngestReport};
pub use model::{Embedder, ModelClient, ModelError};
pub use retrieval::{cosine_similarity, RetrievalEngine, RetrievalOptions, SearchHit};

use thiserror::Error;

/// Error type for documentation-store operations.
#[derive(Error, Debug)]
pub enum RagError {
    #[error(transparent)]
    Proxy(#[from] packbay_core::ProxyError),

    #[error(transparent)]
    Store(#[from] packbay_store::StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Result alias for documentation-store operations.
pub type Result<T> = std::result::Result<T, RagError>;
