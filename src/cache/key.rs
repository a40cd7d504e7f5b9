//! Cache keys for binary artifacts

use crate::extract::Requirement;
use crate::runtime::RuntimeTags;
use std::fmt;

/// Layout version of cached artifacts; bump when the archive format changes
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Identifies one binary build: a requirement on one runtime and platform
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub version: String,
    pub runtime_tag: String,
    pub platform_tag: String,
}

impl CacheKey {
    pub fn new(requirement: &Requirement, tags: &RuntimeTags) -> Self {
        Self {
            name: requirement.name.clone(),
            version: requirement.version.clone(),
            runtime_tag: tags.runtime_tag.clone(),
            platform_tag: tags.platform_tag.clone(),
        }
    }

    /// Local file name: `<name>-<version>-<runtime>-<platform>.tar.zst`
    ///
    /// Dashes in the name become underscores so the name/version boundary
    /// stays unambiguous.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}.tar.zst",
            self.name.replace('-', "_"),
            sanitize(&self.version),
            self.runtime_tag,
            self.platform_tag
        )
    }

    /// Object path below the bucket: `[prefix/]name/version/runtime/platform`
    pub fn object_path(&self, prefix: Option<&str>) -> String {
        let version = sanitize(&self.version);
        let parts = [
            self.name.as_str(),
            version.as_str(),
            self.runtime_tag.as_str(),
            self.platform_tag.as_str(),
        ]
        .join("/");
        match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}/{}", prefix, parts),
            None => parts,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}=={} [{}/{}]",
            self.name, self.version, self.runtime_tag, self.platform_tag
        )
    }
}

/// Keep versions path-safe
fn sanitize(component: &str) -> String {
    component.replace(['/', '\\'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tags(runtime: &str, platform: &str) -> RuntimeTags {
        RuntimeTags {
            runtime_tag: runtime.to_string(),
            platform_tag: platform.to_string(),
            prefix: PathBuf::from("/venv"),
            python: PathBuf::from("/venv/bin/python"),
        }
    }

    fn req() -> Requirement {
        Requirement::new("Cached_Property", "1.5.2", "/tmp/b")
    }

    #[test]
    fn same_inputs_same_key() {
        let a = CacheKey::new(&req(), &tags("cp312", "linux_x86_64"));
        let b = CacheKey::new(&req(), &tags("cp312", "linux_x86_64"));
        assert_eq!(a, b);
        assert_eq!(a.file_name(), b.file_name());
    }

    #[test]
    fn tags_change_the_key() {
        let base = CacheKey::new(&req(), &tags("cp312", "linux_x86_64"));
        let other_runtime = CacheKey::new(&req(), &tags("cp311", "linux_x86_64"));
        let other_platform = CacheKey::new(&req(), &tags("cp312", "linux_aarch64"));
        assert_ne!(base.file_name(), other_runtime.file_name());
        assert_ne!(base.file_name(), other_platform.file_name());
        assert_ne!(base.object_path(None), other_platform.object_path(None));
    }

    #[test]
    fn file_name_escapes_dashes() {
        let key = CacheKey::new(&req(), &tags("cp312", "linux_x86_64"));
        assert_eq!(
            key.file_name(),
            "cached_property-1.5.2-cp312-linux_x86_64.tar.zst"
        );
    }

    #[test]
    fn object_path_with_prefix() {
        let key = CacheKey::new(&req(), &tags("cp312", "linux_x86_64"));
        assert_eq!(
            key.object_path(Some("/noble/")),
            "noble/cached-property/1.5.2/cp312/linux_x86_64"
        );
        assert_eq!(
            key.object_path(Some("")),
            "cached-property/1.5.2/cp312/linux_x86_64"
        );
    }
}
