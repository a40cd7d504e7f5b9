//! The acquisition-and-build state machine
//!
//! ```text
//! LocalResolve --ok--> Build --> Install --> Done
//!      |   ^
//!   fail   ok
//!      v   |
//!     Download --fail, under limit--> Download
//!              --fail, limit spent--> AcquisitionFailed
//! ```

use super::runner::{CommandSpec, ProcessOutput, ProcessRunner, SystemRunner};
use super::state::{BuildAttempt, Phase};
use crate::cache::{ArtifactCache, CacheKey, CachedArtifact};
use crate::config::Config;
use crate::dist::{Installer, PrefixInstaller, SetupPyToolchain, Toolchain};
use crate::error::{AccelError, AccelResult};
use crate::extract::{Extractor, Requirement};
use crate::remediation::{OsFamily, RemediationOutcome, SystemDependencyResolver};
use crate::runtime::RuntimeTags;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// External collaborators, injectable for tests
pub struct Collaborators {
    pub runner: Arc<dyn ProcessRunner>,
    pub cache: ArtifactCache,
    pub toolchain: Box<dyn Toolchain>,
    pub installer: Box<dyn Installer>,
    pub resolver: SystemDependencyResolver,
}

/// Outcome of a successful accelerated install
#[derive(Debug, Clone)]
pub struct InstallReport {
    /// Requirements in install order
    pub requirements: Vec<Requirement>,
    pub built: usize,
    pub cache_hits: usize,
    pub network_fetches: u32,
}

pub struct Orchestrator {
    parts: Collaborators,
    extractor: Extractor,
    tags: RuntimeTags,
    ui: UiContext,
    package_manager: String,
    source_index: PathBuf,
    build_dir: PathBuf,
    network_retry_limit: u32,
    timeout: Duration,
    _build_dir_guard: Option<TempDir>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        tags: RuntimeTags,
        build_dir: PathBuf,
        parts: Collaborators,
        ui: UiContext,
    ) -> AccelResult<Self> {
        Ok(Self {
            extractor: Extractor::new(&config.extract.patterns, &build_dir)?,
            parts,
            tags,
            ui,
            package_manager: config.build.package_manager.clone(),
            source_index: config.source_index_dir(),
            build_dir,
            network_retry_limit: config.build.network_retry_limit,
            timeout: Duration::from_secs(config.build.subprocess_timeout_secs),
            _build_dir_guard: None,
        })
    }

    /// Wire up real subprocesses, cache backends and the probed interpreter
    pub async fn from_config(config: &Config, ui: UiContext) -> AccelResult<Self> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        let tags = RuntimeTags::probe(runner.as_ref(), &config.build).await?;
        let cache = ArtifactCache::open(config).await?;
        info!("Cache backends: {}", cache.active_backends().join(", "));

        let build_dir = tempfile::Builder::new()
            .prefix("accel-build-")
            .tempdir()
            .map_err(|e| AccelError::io("creating build directory", e))?;

        let timeout = Duration::from_secs(config.build.subprocess_timeout_secs);
        let parts = Collaborators {
            toolchain: Box::new(SetupPyToolchain::new(
                runner.clone(),
                tags.python.to_string_lossy(),
                tags.prefix.clone(),
                timeout,
            )),
            installer: Box::new(PrefixInstaller::new(&tags)),
            resolver: SystemDependencyResolver::new(
                &config.remediation,
                OsFamily::detect(),
                runner.clone(),
                ui.clone(),
            )?,
            cache,
            runner,
        };

        let mut orchestrator =
            Self::new(config, tags, build_dir.path().to_path_buf(), parts, ui)?;
        orchestrator._build_dir_guard = Some(build_dir);
        Ok(orchestrator)
    }

    /// Run the whole state machine for package manager `args`
    pub async fn run(&self, args: &[String]) -> AccelResult<InstallReport> {
        tokio::fs::create_dir_all(&self.source_index)
            .await
            .map_err(|e| AccelError::io(format!("creating {}", self.source_index.display()), e))?;

        let mut attempt = BuildAttempt::new();
        let requirements = self.acquire(args, &mut attempt).await?;

        attempt.enter(Phase::Build);
        let (built, cache_hits) = self.build_missing(&requirements).await?;

        attempt.enter(Phase::Install);
        self.install_all(&requirements).await?;

        attempt.enter(Phase::Done);
        Ok(InstallReport {
            requirements,
            built,
            cache_hits,
            network_fetches: attempt.attempt_count,
        })
    }

    /// Alternate between local-only resolution and network downloads until
    /// the local index satisfies every requirement
    async fn acquire(
        &self,
        args: &[String],
        attempt: &mut BuildAttempt,
    ) -> AccelResult<Vec<Requirement>> {
        // An upgrade wants newer versions than the local index may hold
        let mut skip_local = is_upgrade(args);

        loop {
            match attempt.phase {
                Phase::LocalResolve if skip_local => {
                    debug!("Upgrade requested, skipping local-only resolution");
                    skip_local = false;
                    attempt.enter(Phase::Download);
                }
                Phase::LocalResolve => {
                    let mut spinner = TaskSpinner::new(&self.ui);
                    spinner.start("Unpacking local source distributions");
                    let output = self.run_package_manager(args, false).await?;
                    if output.success() {
                        spinner.stop("Local source distributions unpacked");
                        return self.extractor.extract(&output.lines);
                    }
                    spinner.stop_warn("Some source distributions are missing locally");
                    attempt.fail(output.transcript());
                    attempt.enter(Phase::Download);
                }
                Phase::Download => {
                    if !attempt.can_download(self.network_retry_limit) {
                        return Err(AccelError::AcquisitionFailed {
                            attempts: attempt.attempt_count,
                            output: attempt.last_error.take().unwrap_or_default(),
                        });
                    }
                    attempt.attempt_count += 1;

                    let mut spinner = TaskSpinner::new(&self.ui);
                    spinner.start(&format!(
                        "Downloading source distributions (attempt {} of {})",
                        attempt.attempt_count, self.network_retry_limit
                    ));
                    let output = self.run_package_manager(args, true).await?;
                    if output.success() {
                        spinner.stop("Source distributions downloaded");
                        attempt.enter(Phase::LocalResolve);
                    } else {
                        spinner.stop_error("Download failed");
                        warn!("Download attempt {} failed", attempt.attempt_count);
                        attempt.fail(output.transcript());
                    }
                }
                other => {
                    return Err(AccelError::Internal(format!(
                        "acquisition entered unexpected phase {}",
                        other
                    )))
                }
            }
        }
    }

    async fn run_package_manager(&self, args: &[String], network: bool) -> AccelResult<ProcessOutput> {
        reset_dir(&self.build_dir).await?;
        let spec = CommandSpec::new(&self.package_manager)
            .args(package_manager_args(
                args,
                &self.source_index,
                &self.build_dir,
                network,
            ))
            .timeout(self.timeout);
        self.parts.runner.run(&spec).await
    }

    /// Build every requirement the cache doesn't have; returns (built, hits)
    async fn build_missing(&self, requirements: &[Requirement]) -> AccelResult<(usize, usize)> {
        let mut built = 0;
        let mut hits = 0;

        for requirement in requirements {
            let key = CacheKey::new(requirement, &self.tags);
            // Presence only; the payload is fetched (and promoted) at install
            if self.parts.cache.contains(&key).await? {
                debug!("{} is cached", requirement);
                hits += 1;
                continue;
            }

            let mut spinner = TaskSpinner::new(&self.ui);
            spinner.start(&format!("Building {}", requirement));
            let bytes = match self.build_with_remediation(requirement, &mut spinner).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    spinner.stop_error(&format!("Failed to build {}", requirement));
                    return Err(e);
                }
            };
            self.parts
                .cache
                .store(&key, &CachedArtifact::new(bytes))
                .await?;
            spinner.stop(&format!("Built {}", requirement));
            built += 1;
        }

        Ok((built, hits))
    }

    /// Build once; on failure ask the resolver, and retry once if it fixed something
    async fn build_with_remediation(
        &self,
        requirement: &Requirement,
        spinner: &mut TaskSpinner,
    ) -> AccelResult<Vec<u8>> {
        let output = match self.parts.toolchain.build(requirement).await {
            Err(AccelError::BuildFailed { output, .. }) => output,
            other => return other,
        };

        spinner.stop_warn(&format!("Build of {} failed, checking system dependencies", requirement));
        match self.parts.resolver.remediate(&output).await? {
            RemediationOutcome::Remediated(packages) => {
                ui::step_ok(
                    &self.ui,
                    &format!("Installed system packages: {}", packages.join(", ")),
                );
                spinner.start(&format!("Rebuilding {}", requirement));
                self.parts.toolchain.build(requirement).await
            }
            RemediationOutcome::NotApplicable(reason) => Err(AccelError::RemediationUnavailable {
                name: requirement.name.clone(),
                version: requirement.version.clone(),
                reason,
                output,
            }),
        }
    }

    /// Install from the cache, strictly in extraction order
    async fn install_all(&self, requirements: &[Requirement]) -> AccelResult<()> {
        for requirement in requirements {
            let key = CacheKey::new(requirement, &self.tags);
            let Some(artifact) = self.parts.cache.resolve(&key).await? else {
                return Err(AccelError::InstallFailed {
                    name: requirement.name.clone(),
                    version: requirement.version.clone(),
                    reason: "binary distribution missing from cache after build".to_string(),
                });
            };
            self.parts.installer.install(requirement, &artifact).await?;
            debug!("Installed {}", requirement);
        }
        Ok(())
    }
}

/// `-U`/`--upgrade` among the forwarded arguments
pub fn is_upgrade(args: &[String]) -> bool {
    args.iter().any(|a| a == "-U" || a == "--upgrade")
}

/// Splice accel's acquisition flags in right after `install`
fn package_manager_args(
    args: &[String],
    source_index: &Path,
    build_dir: &Path,
    network: bool,
) -> Vec<String> {
    let mut flags = vec![
        format!("--download={}", source_index.display()),
        format!("--find-links=file://{}", source_index.display()),
        "--no-binary=:all:".to_string(),
        "--no-clean".to_string(),
        format!("--build={}", build_dir.display()),
        "-v".to_string(),
    ];
    if !network {
        flags.insert(0, "--no-index".to_string());
    }

    let position = args
        .iter()
        .position(|a| a == "install")
        .map_or(args.len(), |i| i + 1);
    let mut spliced = args[..position].to_vec();
    spliced.extend(flags);
    spliced.extend_from_slice(&args[position..]);
    spliced
}

/// Empty `dir`, creating it if needed
async fn reset_dir(dir: &Path) -> AccelResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(AccelError::io(format!("clearing {}", dir.display()), e)),
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| AccelError::io(format!("creating {}", dir.display()), e))
}
