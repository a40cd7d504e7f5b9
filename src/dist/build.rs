//! Native builds through `setup.py`

use super::Toolchain;
use crate::error::{AccelError, AccelResult};
use crate::extract::Requirement;
use crate::orchestration::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tar::Builder as TarBuilder;
use tracing::{debug, info, warn};

/// Build commands tried in order; some projects only implement plain `bdist`
const BUILD_COMMANDS: &[&[&str]] = &[&["bdist_dumb", "--format=tar"], &["bdist", "--formats=tar"]];

/// Run `setup.py` under setuptools the way pip does, so metadata ends up
/// in an `.egg-info` directory
const SETUPTOOLS_SHIM: &str = "import setuptools, tokenize; __file__='setup.py'; \
exec(compile(open(__file__).read().replace('\\r\\n', '\\n'), __file__, 'exec'))";

const ZSTD_LEVEL: i32 = 3;

/// Builds with `python setup.py bdist_dumb`, falling back to `bdist`
pub struct SetupPyToolchain {
    runner: Arc<dyn ProcessRunner>,
    python: String,
    prefix: PathBuf,
    timeout: Duration,
}

impl SetupPyToolchain {
    /// `prefix` is the installation prefix archives are built for; member
    /// paths are made relative to it.
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        python: impl Into<String>,
        prefix: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            python: python.into(),
            prefix: prefix.into(),
            timeout,
        }
    }

    /// Run one build command; returns the produced archive or the transcript
    async fn try_command(
        &self,
        requirement: &Requirement,
        command: &[&str],
    ) -> AccelResult<Result<PathBuf, String>> {
        let dist_dir = requirement.source_path.join("dist");
        if dist_dir.exists() {
            debug!("Cleaning previous distributions in {}", dist_dir.display());
            tokio::fs::remove_dir_all(&dist_dir)
                .await
                .map_err(|e| AccelError::io(format!("removing {}", dist_dir.display()), e))?;
        }

        let spec = CommandSpec::new(&self.python)
            .args(["-c", SETUPTOOLS_SHIM])
            .args(command.iter().copied())
            .arg(format!("--dist-dir={}", dist_dir.display()))
            .cwd(&requirement.source_path)
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            let mut transcript = output.transcript();
            if output.timed_out {
                transcript.push_str(&format!("\n(timed out after {:?})", self.timeout));
            }
            return Ok(Err(transcript));
        }

        let archives = find_archives(&dist_dir);
        match archives.as_slice() {
            [archive] => Ok(Ok(archive.clone())),
            [] => Ok(Err(format!(
                "{}\n`{}` did not produce a binary distribution archive",
                output.transcript(),
                command.join(" ")
            ))),
            many => Ok(Err(format!(
                "`{}` produced more than one archive: {:?}",
                command.join(" "),
                many
            ))),
        }
    }
}

fn find_archives(dist_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dist_dir) else {
        return Vec::new();
    };
    let mut archives: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "tar"))
        .collect();
    archives.sort();
    archives
}

#[async_trait]
impl Toolchain for SetupPyToolchain {
    async fn build(&self, requirement: &Requirement) -> AccelResult<Vec<u8>> {
        if !requirement.source_path.join("setup.py").is_file() {
            return Err(AccelError::InvalidSourceDistribution {
                name: requirement.name.clone(),
                version: requirement.version.clone(),
                path: requirement.source_path.clone(),
            });
        }

        info!("Building binary distribution of {}", requirement);
        let mut transcripts = Vec::new();
        for command in BUILD_COMMANDS {
            match self.try_command(requirement, command).await? {
                Ok(archive) => {
                    let prefix = self.prefix.clone();
                    return tokio::task::spawn_blocking(move || transform_bdist(&archive, &prefix))
                        .await
                        .map_err(|e| AccelError::Internal(format!("transform task failed: {}", e)))?;
                }
                Err(transcript) => {
                    warn!("`setup.py {}` failed for {}", command.join(" "), requirement);
                    transcripts.push(transcript);
                }
            }
        }

        Err(AccelError::BuildFailed {
            name: requirement.name.clone(),
            version: requirement.version.clone(),
            output: transcripts.join("\n"),
        })
    }
}

/// Convert a dumb binary distribution into a cacheable `.tar.zst`
///
/// Member paths become relative to `prefix`, `local/` is dropped,
/// `dist-packages` becomes `site-packages` and modes are normalised to
/// 0755 or 0644. Directories and special files are skipped.
pub fn transform_bdist(archive_path: &Path, prefix: &Path) -> AccelResult<Vec<u8>> {
    debug!("Transforming binary distribution {}", archive_path.display());
    let io_err = |e: std::io::Error| AccelError::io(format!("transforming {}", archive_path.display()), e);

    let file = File::open(archive_path).map_err(io_err)?;
    let mut input = tar::Archive::new(file);

    let encoder = zstd::stream::Encoder::new(Vec::new(), ZSTD_LEVEL).map_err(io_err)?;
    let mut builder = TarBuilder::new(encoder);
    let prefix = normalize_absolute(prefix);

    for entry in input.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let original = entry.path().map_err(io_err)?.into_owned();
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            continue;
        }
        if !(entry_type.is_file() || entry_type.is_symlink()) {
            warn!("Ignoring special file {}", original.display());
            continue;
        }

        let absolute = normalize_absolute(&original);
        let Ok(relative) = absolute.strip_prefix(&prefix) else {
            warn!(
                "Skipping {}: not below installation prefix {}",
                original.display(),
                prefix.display()
            );
            continue;
        };
        let relative = rewrite_member_path(relative);
        debug!("Transformed {} -> {}", original.display(), relative);

        let mode = entry.header().mode().map_err(io_err)?;
        let mut header = tar::Header::new_gnu();
        header.set_mode(if mode & 0o100 != 0 { 0o755 } else { 0o644 });
        header.set_mtime(entry.header().mtime().unwrap_or(0));
        header.set_uid(0);
        header.set_gid(0);

        if entry_type.is_symlink() {
            let target = entry
                .link_name()
                .map_err(io_err)?
                .map(|t| t.into_owned())
                .unwrap_or_default();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, &relative, &target)
                .map_err(io_err)?;
        } else {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).map_err(io_err)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_cksum();
            builder
                .append_data(&mut header, &relative, contents.as_slice())
                .map_err(io_err)?;
        }
    }

    let encoder = builder.into_inner().map_err(io_err)?;
    encoder.finish().map_err(io_err)
}

/// Interpret `path` relative to `/`, resolving `.` and `..`
fn normalize_absolute(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn rewrite_member_path(relative: &Path) -> String {
    let path = relative.to_string_lossy().replace('\\', "/");
    let path = path.strip_prefix("local/").unwrap_or(path.as_str());
    path.replace("/dist-packages/", "/site-packages/")
}
