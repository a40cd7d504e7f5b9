//! Binary artifact cache
//!
//! An ordered list of storage backends behind one get/put contract. The
//! first backend is the primary (local filesystem); later ones are
//! secondary tiers such as a shared remote bucket.
//!
//! # Tiering rules
//!
//! | Event | Behavior |
//! |-------|----------|
//! | Hit in backend `i > 0` | Copied into every writable backend before `i` |
//! | Primary `put` fails | Fatal for that requirement |
//! | Secondary fails | Logged, backend disabled for the rest of the run |

pub mod backend;
pub mod key;
pub mod local;
pub mod remote;

pub use backend::{CacheBackend, CachedArtifact};
pub use key::{CacheKey, CACHE_FORMAT_VERSION};
pub use local::LocalBackend;
pub use remote::RemoteBackend;

use crate::config::Config;
use crate::error::{AccelError, AccelResult};
use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct ArtifactCache {
    backends: Vec<Box<dyn CacheBackend>>,
    disabled: Vec<AtomicBool>,
}

impl ArtifactCache {
    pub fn new(backends: Vec<Box<dyn CacheBackend>>) -> Self {
        let disabled = backends.iter().map(|_| AtomicBool::new(false)).collect();
        Self { backends, disabled }
    }

    /// Build the backend list from configuration: local first, then remote
    ///
    /// An unreachable remote is skipped with a warning; a missing bucket
    /// without auto-create is fatal.
    pub async fn open(config: &Config) -> AccelResult<Self> {
        let mut backends: Vec<Box<dyn CacheBackend>> =
            vec![Box::new(LocalBackend::new(&config.binary_cache_dir()))];

        match RemoteBackend::connect(&config.remote).await {
            Ok(Some(remote)) => {
                info!(
                    "Remote cache enabled{}",
                    if remote.is_writable() { "" } else { " (read-only)" }
                );
                backends.push(Box::new(remote));
            }
            Ok(None) => debug!("No remote cache configured"),
            Err(e @ AccelError::BackendUnavailable { .. }) => {
                warn!("Remote cache disabled: {}", e);
            }
            Err(e) => return Err(e),
        }

        Ok(Self::new(backends))
    }

    /// Names of backends still in use
    pub fn active_backends(&self) -> Vec<&str> {
        self.backends
            .iter()
            .enumerate()
            .filter(|(i, _)| self.is_active(*i))
            .map(|(_, b)| b.name())
            .collect()
    }

    fn is_active(&self, index: usize) -> bool {
        !self.disabled[index].load(Ordering::Relaxed)
    }

    fn disable(&self, index: usize, error: &AccelError) {
        warn!(
            "Disabling {} cache for the rest of this run: {}",
            self.backends[index].name(),
            error
        );
        self.disabled[index].store(true, Ordering::Relaxed);
    }

    /// Look up `key` in backend order, promoting hits into faster tiers
    pub async fn resolve(&self, key: &CacheKey) -> AccelResult<Option<CachedArtifact>> {
        for (index, backend) in self.backends.iter().enumerate() {
            if !self.is_active(index) {
                continue;
            }
            match backend.get(key).await {
                Ok(Some(artifact)) => {
                    debug!("Cache hit for {} in {} cache", key, backend.name());
                    if index > 0 {
                        self.promote(key, &artifact, index).await;
                    }
                    return Ok(Some(artifact));
                }
                Ok(None) => continue,
                Err(e) if index == 0 => return Err(e),
                Err(e @ AccelError::CorruptArtifact { .. }) => {
                    warn!("Ignoring {} cache entry: {}", backend.name(), e);
                }
                Err(e) => self.disable(index, &e),
            }
        }
        Ok(None)
    }

    /// Copy a hit from `found_at` into every writable backend before it
    async fn promote(&self, key: &CacheKey, artifact: &CachedArtifact, found_at: usize) {
        let targets: Vec<usize> = (0..found_at)
            .filter(|&i| self.is_active(i) && self.backends[i].is_writable())
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|&i| self.backends[i].put(key, artifact)),
        )
        .await;

        for (&index, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => debug!("Promoted {} into {} cache", key, self.backends[index].name()),
                Err(e) if index == 0 => {
                    warn!("Failed to promote {} into {} cache: {}", key, self.backends[index].name(), e)
                }
                Err(e) => self.disable(index, &e),
            }
        }
    }

    /// Whether any active backend holds `key`, without downloading it
    pub async fn contains(&self, key: &CacheKey) -> AccelResult<bool> {
        for (index, backend) in self.backends.iter().enumerate() {
            if !self.is_active(index) {
                continue;
            }
            match backend.has(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) if index == 0 => return Err(e),
                Err(e) => self.disable(index, &e),
            }
        }
        Ok(false)
    }

    /// Write `artifact` to every writable backend
    ///
    /// Only a primary failure is returned; secondary tiers degrade.
    pub async fn store(&self, key: &CacheKey, artifact: &CachedArtifact) -> AccelResult<()> {
        if self.backends.first().is_some_and(|b| b.is_writable()) {
            self.backends[0].put(key, artifact).await?;
        }

        let secondaries: Vec<usize> = (1..self.backends.len())
            .filter(|&i| self.is_active(i) && self.backends[i].is_writable())
            .collect();
        let results = join_all(
            secondaries
                .iter()
                .map(|&i| self.backends[i].put(key, artifact)),
        )
        .await;

        for (&index, result) in secondaries.iter().zip(results) {
            if let Err(e) = result {
                self.disable(index, &e);
            }
        }
        Ok(())
    }
}
