//! Registry proxy engine.
//!
//! Provides the server-side machinery of the packbay proxy:
//! - Streaming file digests and content-addressed cache keys
//! - The upstream registry client (pooled TLS, explicit timeouts, no retries)
//! - The on-disk package cache: metadata documents with rewritten tarball
//!   URLs, and tarball files
//! - The download coordinator: single-flight fetches with a streaming tee
//!   to the client socket and the cache file
//! - The integrity verifier and the audit log it feeds

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod audit;
pub mod client;
pub mod config;
pub mod error;
pub mod flight;
pub mod hash;
pub mod meta;
pub mod tarball;
pub mod verify;

pub use audit::AuditLog;
pub use client::RegistryClient;
pub use config::ProxyConfig;
pub use error::ProxyError;
pub use flight::{DownloadCoordinator, EnsureOutcome, TarballDelivery};
pub use meta::MetadataCache;
pub use verify::{IntegrityVerifier, VerifyOutcome};

/// Result alias for proxy engine operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
