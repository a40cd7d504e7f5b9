//! Binary distributions: building them from sources and installing them
//!
//! Both sides sit behind traits so the orchestrator can be tested without
//! a Python toolchain.

mod build;
mod install;

pub use build::{transform_bdist, SetupPyToolchain};
pub use install::{fix_hashbang, PrefixInstaller};

use crate::cache::CachedArtifact;
use crate::error::AccelResult;
use crate::extract::Requirement;
use async_trait::async_trait;

/// Builds a cacheable binary archive from an unpacked source distribution
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Build `requirement`, returning `.tar.zst` bytes of prefix-relative files
    ///
    /// Fails with `BuildFailed` carrying the build transcript.
    async fn build(&self, requirement: &Requirement) -> AccelResult<Vec<u8>>;
}

/// Installs cached binary archives into the target environment
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, requirement: &Requirement, artifact: &CachedArtifact)
        -> AccelResult<()>;
}
