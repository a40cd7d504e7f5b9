//! Configuration schema for accel
//!
//! Configuration is merged from `/etc/accel.toml`,
//! `~/.config/accel/config.toml` and the file named by `--config`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Local binary cache settings
    pub cache: CacheConfig,

    /// Remote object-store cache settings
    pub remote: RemoteConfig,

    /// Package manager and toolchain settings
    pub build: BuildConfig,

    /// Transcript patterns for dependency extraction
    pub extract: ExtractConfig,

    /// Missing system dependency handling
    pub remediation: RemediationConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Local cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Data directory holding `binaries/` and `sources/` (default depends on uid)
    pub root: Option<PathBuf>,
}

/// Remote cache configuration. No bucket means no remote tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub bucket: Option<String>,

    /// Key prefix inside the bucket, e.g. `ubuntu-noble-amd64`
    pub prefix: Option<String>,

    /// Object store endpoint
    pub url: String,

    /// Only read from the bucket, never upload
    pub readonly: bool,

    /// Create the bucket when it doesn't exist
    pub create_bucket: bool,

    /// Bearer token sent with every request
    pub token: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: None,
            url: "https://s3.amazonaws.com".to_string(),
            readonly: false,
            create_bucket: false,
            token: None,
            timeout_secs: 60,
        }
    }
}

/// Package manager and toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Package manager executable
    pub package_manager: String,

    /// Interpreter used to build and to probe runtime tags
    pub python: String,

    /// Attempt ceiling for the network download phase
    pub network_retry_limit: u32,

    /// Timeout for each subprocess, in seconds
    pub subprocess_timeout_secs: u64,

    /// Override the probed interpreter tag (e.g. `cp312`)
    pub runtime_tag: Option<String>,

    /// Override the probed platform tag (e.g. `linux_x86_64`)
    pub platform_tag: Option<String>,

    /// Override the probed installation prefix
    pub install_prefix: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            package_manager: "pip".to_string(),
            python: "python3".to_string(),
            network_retry_limit: 3,
            subprocess_timeout_secs: 3600,
            runtime_tag: None,
            platform_tag: None,
            install_prefix: None,
        }
    }
}

/// Extraction pattern table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Regexes with named groups `name`, `version` and optional `source`
    pub patterns: Vec<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            patterns: crate::extract::DEFAULT_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// A build-failure signature and the system packages that fix it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationRule {
    /// Regex matched against the build output
    pub pattern: String,

    /// System packages to install, in order
    pub packages: Vec<String>,
}

/// Remediation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Install missing system packages without prompting
    pub auto_remediate: bool,

    /// Ordered rule table; the first matching rule wins
    pub rules: Vec<RemediationRule>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            auto_remediate: false,
            rules: crate::remediation::debian_rules(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[build]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.network_retry_limit, 3);
        assert!(config.remote.bucket.is_none());
        assert!(!config.remediation.rules.is_empty());
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [remote]
            bucket = "ci-wheels"
            readonly = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.remote.bucket.as_deref(), Some("ci-wheels"));
        assert!(config.remote.readonly);
        assert_eq!(config.remote.url, "https://s3.amazonaws.com"); // default preserved
    }

    #[test]
    fn custom_rules_replace_bundled() {
        let toml = r#"
            [[remediation.rules]]
            pattern = "gdal-config"
            packages = ["libgdal-dev"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.remediation.rules.len(), 1);
        assert_eq!(config.remediation.rules[0].packages, vec!["libgdal-dev"]);
    }
}
