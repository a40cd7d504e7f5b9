//! Storage backend abstraction for binary artifacts

use super::key::CacheKey;
use crate::error::{AccelError, AccelResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// A cached binary distribution: a `.tar.zst` of prefix-relative files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    bytes: Vec<u8>,
    sha256: String,
}

impl CachedArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        let sha256 = sha256_hex(&bytes);
        Self { bytes, sha256 }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Hex SHA-256 of the archive bytes
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Check size and digest against what the store advertised
    pub fn verify(
        &self,
        key: &CacheKey,
        expected_size: Option<u64>,
        expected_sha256: Option<&str>,
    ) -> AccelResult<()> {
        if let Some(size) = expected_size {
            if size != self.size() {
                return Err(AccelError::CorruptArtifact {
                    key: key.to_string(),
                    reason: format!("expected {} bytes, got {}", size, self.size()),
                });
            }
        }
        if let Some(digest) = expected_sha256 {
            if !digest.eq_ignore_ascii_case(&self.sha256) {
                return Err(AccelError::CorruptArtifact {
                    key: key.to_string(),
                    reason: format!("sha256 mismatch (expected {}, got {})", digest, self.sha256),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Key/value store for binary artifacts
///
/// Backends are ordered fastest-first inside an `ArtifactCache`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name for logs ("local", "remote")
    fn name(&self) -> &str;

    /// Whether `put` stores anything
    fn is_writable(&self) -> bool;

    /// Fetch an artifact; `Ok(None)` on a miss
    async fn get(&self, key: &CacheKey) -> AccelResult<Option<CachedArtifact>>;

    /// Check presence without transferring the payload
    async fn has(&self, key: &CacheKey) -> AccelResult<bool>;

    /// Store an artifact, replacing any existing entry
    async fn put(&self, key: &CacheKey, artifact: &CachedArtifact) -> AccelResult<()>;
}
