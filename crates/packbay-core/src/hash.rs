//! Streaming digest computation.
//!
//! Integrity digests use the registry's subresource-integrity encoding:
//! `"<algo>-<base64>"` over the raw digest bytes. Files are hashed as a
//! byte stream, so memory use is bounded and independent of file size.
//! Cache keys (question digests, embedding text digests) use blake3 hex,
//! which is fast and needs no cryptographic strength.

use crate::error::ProxyError;
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Read buffer size for streaming digests.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Digest algorithms accepted in upstream integrity strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha512,
    Sha256,
}

impl Algorithm {
    /// Parse an algorithm name (`"sha512"`, `"sha256"`).
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "sha512" => Ok(Self::Sha512),
            "sha256" => Ok(Self::Sha256),
            other => Err(ProxyError::UnsupportedAlgorithm {
                algorithm: other.to_string(),
            }),
        }
    }

    /// The algorithm named by the prefix of an integrity string
    /// (`"sha512-..."` → `Sha512`).
    pub fn from_integrity(integrity: &str) -> Result<Self> {
        let prefix = integrity.split('-').next().unwrap_or_default();
        Self::parse(prefix)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha512 => "sha512",
            Self::Sha256 => "sha256",
        }
    }
}

enum StreamHasher {
    Sha512(Sha512),
    Sha256(Sha256),
}

impl StreamHasher {
    fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha512 => Self::Sha512(Sha512::new()),
            Algorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha512(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Digest a file as `"<algo>-<base64>"`, streaming in fixed-size chunks.
pub async fn digest_file(path: &Path, algorithm: Algorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = StreamHasher::new(algorithm);
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!(
        "{}-{}",
        algorithm.as_str(),
        BASE64.encode(hasher.finalize())
    ))
}

/// Digest raw bytes as `"<algo>-<base64>"`.
#[must_use]
pub fn digest_bytes(data: &[u8], algorithm: Algorithm) -> String {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    format!(
        "{}-{}",
        algorithm.as_str(),
        BASE64.encode(hasher.finalize())
    )
}

/// Fast content-addressed key for cache lookups (blake3 hex).
#[must_use]
pub fn content_digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_digest_matches_one_shot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        // Larger than one read buffer so the streaming loop iterates.
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        for algo in [Algorithm::Sha512, Algorithm::Sha256] {
            let streamed = digest_file(&path, algo).await.unwrap();
            assert_eq!(streamed, digest_bytes(&data, algo));
            assert!(streamed.starts_with(&format!("{}-", algo.as_str())));
        }
    }

    #[tokio::test]
    async fn test_file_digest_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob.bin");

        std::fs::write(&path, b"content v1").unwrap();
        let first = digest_file(&path, Algorithm::Sha512).await.unwrap();

        std::fs::write(&path, b"content v2").unwrap();
        let second = digest_file(&path, Algorithm::Sha512).await.unwrap();

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = digest_file(&dir.path().join("nope.bin"), Algorithm::Sha512).await;
        assert!(matches!(result, Err(ProxyError::Io(_))));
    }

    #[test]
    fn test_algorithm_from_integrity() {
        assert_eq!(
            Algorithm::from_integrity("sha512-deadbeef").unwrap(),
            Algorithm::Sha512
        );
        assert_eq!(
            Algorithm::from_integrity("sha256-cafe").unwrap(),
            Algorithm::Sha256
        );
        assert!(Algorithm::from_integrity("md5-0000").is_err());
        assert!(Algorithm::from_integrity("").is_err());
    }

    #[test]
    fn test_content_digest_deterministic() {
        let a = content_digest("what is left-pad?");
        let b = content_digest("what is left-pad?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_digest("what is right-pad?"));
    }
}
