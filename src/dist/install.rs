//! Installing cached archives into a prefix

use super::Installer;
use crate::cache::CachedArtifact;
use crate::error::{AccelError, AccelResult};
use crate::extract::Requirement;
use crate::runtime::RuntimeTags;
use async_trait::async_trait;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Unpacks archives below the target prefix
pub struct PrefixInstaller {
    prefix: PathBuf,
    python: PathBuf,
}

impl PrefixInstaller {
    pub fn new(tags: &RuntimeTags) -> Self {
        Self {
            prefix: tags.prefix.clone(),
            python: tags.python.clone(),
        }
    }
}

#[async_trait]
impl Installer for PrefixInstaller {
    async fn install(&self, requirement: &Requirement, artifact: &CachedArtifact) -> AccelResult<()> {
        let bytes = artifact.bytes().to_vec();
        let prefix = self.prefix.clone();
        let python = self.python.clone();

        let result = tokio::task::spawn_blocking(move || unpack(&bytes, &prefix, &python))
            .await
            .map_err(|e| AccelError::Internal(format!("install task failed: {}", e)))?;

        match result {
            Ok(files) => {
                debug!("Installed {} files for {}", files.len(), requirement);
                Ok(())
            }
            Err(reason) => Err(AccelError::InstallFailed {
                name: requirement.name.clone(),
                version: requirement.version.clone(),
                reason,
            }),
        }
    }
}

/// Extract `archive` below `prefix`, returning the installed paths
fn unpack(archive: &[u8], prefix: &Path, python: &Path) -> Result<Vec<PathBuf>, String> {
    let decoder = zstd::stream::Decoder::new(archive).map_err(|e| e.to_string())?;
    let mut archive = tar::Archive::new(decoder);
    let mut installed = Vec::new();

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let member = entry.path().map_err(|e| e.to_string())?.into_owned();
        check_member_path(&member)?;

        // A virtualenv's include/ links into /usr/include; headers go one level down
        let relative = match member.strip_prefix("include") {
            Ok(rest) => Path::new("include/site").join(rest),
            Err(_) => member.clone(),
        };
        let target = prefix.join(&relative);
        let describe = |e: std::io::Error| format!("{}: {}", target.display(), e);

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(describe)?;
        }
        if target.symlink_metadata().is_ok() {
            std::fs::remove_file(&target).map_err(describe)?;
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() {
            let link = entry
                .link_name()
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("symlink {} has no target", member.display()))?
                .into_owned();
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target).map_err(describe)?;
            #[cfg(not(unix))]
            let _ = link;
        } else if entry_type.is_file() {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).map_err(describe)?;
            let contents = fix_hashbang(&contents, python).unwrap_or(contents);
            std::fs::write(&target, &contents).map_err(describe)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = entry.header().mode().map_err(|e| e.to_string())?;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
                    .map_err(describe)?;
            }
        } else {
            continue;
        }

        debug!("Installed {}", target.display());
        installed.push(target);
    }

    write_installed_files(&installed).map_err(|e| e.to_string())?;
    Ok(installed)
}

/// Reject absolute paths and `..` so an archive cannot escape the prefix
fn check_member_path(member: &Path) -> Result<(), String> {
    let escapes = member.components().any(|c| {
        matches!(
            c,
            Component::RootDir | Component::ParentDir | Component::Prefix(_)
        )
    });
    if escapes || member.as_os_str().is_empty() {
        Err(format!("refusing unsafe archive member {:?}", member))
    } else {
        Ok(())
    }
}

/// Point Python script hashbangs at `python`
///
/// Returns `None` when the contents don't start with a Python hashbang.
pub fn fix_hashbang(contents: &[u8], python: &Path) -> Option<Vec<u8>> {
    if !contents.starts_with(b"#!/") {
        return None;
    }
    let line_end = contents
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(contents.len());
    let hashbang = std::str::from_utf8(&contents[..line_end]).ok()?.trim_end();

    let executable = hashbang.rsplit('/').next()?;
    let executable = executable.strip_prefix("env ").unwrap_or(executable);
    let version = executable.strip_prefix("python")?;
    let is_python = version.is_empty()
        || version
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    if !is_python {
        return None;
    }

    debug!("Rewriting hashbang {:?} to use {}", hashbang, python.display());
    let mut fixed = format!("#!{}", python.display()).into_bytes();
    fixed.extend_from_slice(&contents[line_end..]);
    Some(fixed)
}

/// Record installed files in `installed-files.txt` so pip can uninstall
fn write_installed_files(installed: &[PathBuf]) -> std::io::Result<()> {
    let pkg_info: Vec<&PathBuf> = installed
        .iter()
        .filter(|p| {
            p.file_name().is_some_and(|n| n == "PKG-INFO")
                && p.parent()
                    .and_then(Path::extension)
                    .is_some_and(|ext| ext == "egg-info")
        })
        .collect();

    let [pkg_info] = pkg_info.as_slice() else {
        warn!("Not tracking installed files (couldn't determine a single *.egg-info directory)");
        return Ok(());
    };
    let Some(egg_info) = pkg_info.parent() else {
        return Ok(());
    };

    let listing: String = installed
        .iter()
        .map(|path| format!("{}\n", relative_to(path, egg_info).display()))
        .collect();
    std::fs::write(egg_info.join("installed-files.txt"), listing)
}

/// `path` expressed relative to directory `base`
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path: Vec<Component> = path.components().collect();
    let base: Vec<Component> = base.components().collect();
    let common = path
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &path[common..] {
        out.push(component.as_os_str());
    }
    out
}
