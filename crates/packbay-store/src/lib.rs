//! Persistence layer for the packbay registry proxy.
//!
//! Five collections backed by sled trees:
//! - `packages` — one record per downloaded tarball version
//! - `chunks` — documentation chunks, keyed `(package, index)`
//! - `embedding_cache` — short-TTL memoized embedding vectors
//! - `response_cache` — long-TTL memoized chat answers
//! - `security_events` — append-only verification audit log
//!
//! Values are serde_json documents. TTL entries carry an `expires_at`
//! timestamp; reads filter expired entries and delete them lazily, and
//! [`Store::sweep_expired`] reclaims in bulk.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]

mod records;
mod store;

pub use records::{
    now_millis, Chunk, EmbeddingEntry, EventKind, PackageRecord, ResponseEntry, SecurityEvent,
};
pub use store::{Store, VerificationStats};

use thiserror::Error;

/// Persistence error.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Sled(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
