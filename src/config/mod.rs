//! Configuration management for accel
//!
//! Values are layered: explicit overrides beat environment variables, which
//! beat config files, which beat built-in defaults.

pub mod schema;

pub use schema::{Config, RemediationRule};

use crate::error::{AccelError, AccelResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// System-wide config file, loaded first
pub const SYSTEM_CONFIG: &str = "/etc/accel.toml";

/// Environment variable naming an additional config file
pub const CONFIG_ENV: &str = "ACCEL_CONFIG";

/// Configuration manager
pub struct ConfigManager {
    system_path: PathBuf,
    user_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a new config manager with default paths
    pub fn new() -> Self {
        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG),
            user_path: Self::default_config_path(),
            explicit_path: None,
        }
    }

    /// Create a config manager that also loads `path` last
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            explicit_path: Some(path),
            ..Self::new()
        }
    }

    /// Get the default per-user config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("accel")
            .join("config.toml")
    }

    /// Default data directory: `/var/cache/accel` for root, else the user cache dir
    pub fn default_data_dir() -> PathBuf {
        if is_root() {
            PathBuf::from("/var/cache/accel")
        } else {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("accel")
        }
    }

    /// Load and deep-merge every available config file
    ///
    /// A missing system or user file is skipped; a missing explicit file is
    /// an error because the operator asked for it by name.
    pub async fn load_merged(&self) -> AccelResult<Config> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for path in [&self.system_path, &self.user_path] {
            if path.is_file() {
                merge_values(&mut merged, self.read_value(path).await?);
            }
        }

        if let Some(ref path) = self.explicit_path {
            if !path.is_file() {
                return Err(AccelError::ConfigInvalid {
                    path: path.clone(),
                    reason: "file not found".to_string(),
                });
            }
            merge_values(&mut merged, self.read_value(path).await?);
        }

        let origin = self
            .explicit_path
            .clone()
            .unwrap_or_else(|| self.user_path.clone());
        merged.try_into().map_err(|e: toml::de::Error| AccelError::ConfigInvalid {
            path: origin,
            reason: e.to_string(),
        })
    }

    async fn read_value(&self, path: &Path) -> AccelResult<toml::Value> {
        debug!("Loading configuration file: {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| AccelError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| AccelError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively merge `overlay` into `base`; overlay wins on conflicts
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_values(existing, value);
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Explicit overrides, typically from command-line flags
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_root: Option<PathBuf>,
    pub remote_bucket: Option<String>,
    pub remote_prefix: Option<String>,
    pub remote_url: Option<String>,
    pub remote_readonly: Option<bool>,
    pub auto_remediate: Option<bool>,
    pub network_retry_limit: Option<u32>,
    pub python: Option<String>,
}

impl Config {
    /// Apply `ACCEL_*` environment variables through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> AccelResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("ACCEL_CACHE_ROOT") {
            self.cache.root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ACCEL_REMOTE_BUCKET") {
            self.remote.bucket = Some(v);
        }
        if let Some(v) = get("ACCEL_REMOTE_PREFIX") {
            self.remote.prefix = Some(v);
        }
        if let Some(v) = get("ACCEL_REMOTE_URL") {
            self.remote.url = v;
        }
        if let Some(v) = get("ACCEL_REMOTE_READONLY") {
            self.remote.readonly = parse_bool("ACCEL_REMOTE_READONLY", &v)?;
        }
        if let Some(v) = get("ACCEL_REMOTE_CREATE_BUCKET") {
            self.remote.create_bucket = parse_bool("ACCEL_REMOTE_CREATE_BUCKET", &v)?;
        }
        if let Some(v) = get("ACCEL_REMOTE_TOKEN") {
            self.remote.token = Some(v);
        }
        if let Some(v) = get("ACCEL_REMOTE_TIMEOUT") {
            self.remote.timeout_secs = parse_number("ACCEL_REMOTE_TIMEOUT", &v)?;
        }
        if let Some(v) = get("ACCEL_AUTO_REMEDIATE") {
            self.remediation.auto_remediate = parse_bool("ACCEL_AUTO_REMEDIATE", &v)?;
        }
        if let Some(v) = get("ACCEL_NETWORK_RETRY_LIMIT") {
            self.build.network_retry_limit = parse_number("ACCEL_NETWORK_RETRY_LIMIT", &v)?;
        }
        if let Some(v) = get("ACCEL_PYTHON") {
            self.build.python = v;
        }
        if let Some(v) = get("ACCEL_PIP") {
            self.build.package_manager = v;
        }
        Ok(())
    }

    /// Apply explicit overrides (highest precedence)
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(ref root) = overrides.cache_root {
            self.cache.root = Some(root.clone());
        }
        if let Some(ref bucket) = overrides.remote_bucket {
            self.remote.bucket = Some(bucket.clone());
        }
        if let Some(ref prefix) = overrides.remote_prefix {
            self.remote.prefix = Some(prefix.clone());
        }
        if let Some(ref url) = overrides.remote_url {
            self.remote.url = url.clone();
        }
        if let Some(readonly) = overrides.remote_readonly {
            self.remote.readonly = readonly;
        }
        if let Some(auto) = overrides.auto_remediate {
            self.remediation.auto_remediate = auto;
        }
        if let Some(limit) = overrides.network_retry_limit {
            self.build.network_retry_limit = limit;
        }
        if let Some(ref python) = overrides.python {
            self.build.python = python.clone();
        }
    }

    /// Data directory holding the binary cache and source index
    pub fn data_dir(&self) -> PathBuf {
        self.cache
            .root
            .clone()
            .unwrap_or_else(ConfigManager::default_data_dir)
    }

    /// Root of the local binary cache backend
    pub fn binary_cache_dir(&self) -> PathBuf {
        self.data_dir().join("binaries")
    }

    /// Directory the package manager downloads source archives into
    pub fn source_index_dir(&self) -> PathBuf {
        self.data_dir().join("sources")
    }
}

/// Parse a boolean the way operators write them in env files
pub fn parse_bool(key: &str, value: &str) -> AccelResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        other => Err(AccelError::ConfigValue {
            key: key.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> AccelResult<T> {
    value.trim().parse().map_err(|_| AccelError::ConfigValue {
        key: key.to_string(),
        reason: format!("expected a non-negative integer, got {value:?}"),
    })
}

pub(crate) fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir) -> ConfigManager {
        ConfigManager {
            system_path: dir.path().join("system.toml"),
            user_path: dir.path().join("user.toml"),
            explicit_path: None,
        }
    }

    #[tokio::test]
    async fn load_default_when_missing() {
        let temp = TempDir::new().unwrap();
        let config = manager_in(&temp).load_merged().await.unwrap();
        assert_eq!(config.build.package_manager, "pip");
    }

    #[tokio::test]
    async fn later_files_override_earlier() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("system.toml"),
            "[remote]\nbucket = \"shared\"\nprefix = \"fleet\"\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("user.toml"), "[remote]\nbucket = \"mine\"\n").unwrap();

        let config = manager_in(&temp).load_merged().await.unwrap();
        assert_eq!(config.remote.bucket.as_deref(), Some("mine"));
        assert_eq!(config.remote.prefix.as_deref(), Some("fleet"));
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager_in(&temp);
        manager.explicit_path = Some(temp.path().join("nope.toml"));
        assert!(matches!(
            manager.load_merged().await,
            Err(AccelError::ConfigInvalid { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_toml_reports_path() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("user.toml"), "[build\n").unwrap();
        let err = manager_in(&temp).load_merged().await.unwrap_err();
        assert!(err.to_string().contains("user.toml"));
    }

    #[test]
    fn env_overrides_file_and_explicit_overrides_env() {
        let mut config: Config = toml::from_str(
            "[build]\nnetwork_retry_limit = 7\n[remediation]\nauto_remediate = false\n",
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("ACCEL_NETWORK_RETRY_LIMIT", "5"),
            ("ACCEL_AUTO_REMEDIATE", "yes"),
            ("ACCEL_REMOTE_BUCKET", "ci"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.build.network_retry_limit, 5);
        assert!(config.remediation.auto_remediate);
        assert_eq!(config.remote.bucket.as_deref(), Some("ci"));

        config.apply_overrides(&Overrides {
            network_retry_limit: Some(1),
            ..Overrides::default()
        });
        assert_eq!(config.build.network_retry_limit, 1);
    }

    #[test]
    fn env_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env(|k| (k == "ACCEL_REMOTE_READONLY").then(|| "maybe".into()));
        assert!(matches!(result, Err(AccelError::ConfigValue { .. })));
    }

    #[test]
    fn data_layout_follows_root() {
        let mut config = Config::default();
        config.cache.root = Some(PathBuf::from("/srv/accel"));
        assert_eq!(config.binary_cache_dir(), PathBuf::from("/srv/accel/binaries"));
        assert_eq!(config.source_index_dir(), PathBuf::from("/srv/accel/sources"));
    }

    #[test]
    fn merge_replaces_scalars_and_recurses_tables() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n").unwrap();
        merge_values(&mut base, overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
    }
}
