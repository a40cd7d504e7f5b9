//! CLI argument definitions using clap derive

use crate::config::Overrides;
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Accelerator for pip
///
/// Caches source and binary distributions so repeated installs of the same
/// requirements skip the network and the compiler. Everything after the
/// accel options is passed to the package manager.
#[derive(Parser, Debug)]
#[command(name = "accel")]
#[command(author, version, about, long_about = None)]
#[command(override_usage = "accel [OPTIONS] <PIP ARGS>...")]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Additional configuration file, loaded last
    #[arg(short, long, env = "ACCEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the binary cache and source index
    #[arg(long, value_name = "DIR")]
    pub cache_root: Option<PathBuf>,

    /// Remote cache bucket (enables the remote tier)
    #[arg(long, value_name = "NAME")]
    pub remote_bucket: Option<String>,

    /// Key prefix inside the remote bucket
    #[arg(long, value_name = "PREFIX")]
    pub remote_prefix: Option<String>,

    /// Object store endpoint
    #[arg(long, value_name = "URL")]
    pub remote_url: Option<String>,

    /// Never upload to the remote cache (`--remote-readonly=false` to undo a config file)
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub remote_readonly: Option<bool>,

    /// Install missing system packages without asking
    #[arg(
        short = 'y',
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub auto_remediate: Option<bool>,

    /// Maximum number of network download attempts
    #[arg(long, value_name = "N")]
    pub network_retry_limit: Option<u32>,

    /// Target interpreter
    #[arg(long, value_name = "PATH")]
    pub python: Option<String>,

    /// Log output format
    #[arg(long, value_parser = ["text", "json"])]
    pub log_format: Option<String>,

    /// Package manager arguments, e.g. `install -r requirements.txt`
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PIP ARGS"
    )]
    pub args: Vec<String>,
}

impl Cli {
    /// Whether accel should accelerate these arguments or just forward them
    pub fn is_install(&self) -> bool {
        self.args.iter().any(|a| a == "install")
    }

    /// Flags that override configuration files and environment
    pub fn overrides(&self) -> Overrides {
        Overrides {
            cache_root: self.cache_root.clone(),
            remote_bucket: self.remote_bucket.clone(),
            remote_prefix: self.remote_prefix.clone(),
            remote_url: self.remote_url.clone(),
            remote_readonly: self.remote_readonly,
            auto_remediate: self.auto_remediate,
            network_retry_limit: self.network_retry_limit,
            python: self.python.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_parses_install() {
        let cli = Cli::parse_from(["accel", "install", "-r", "requirements.txt"]);
        assert!(cli.is_install());
        assert_eq!(cli.args, vec!["install", "-r", "requirements.txt"]);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn accel_options_stop_at_first_pip_arg() {
        let cli = Cli::parse_from([
            "accel",
            "-vv",
            "--network-retry-limit",
            "5",
            "install",
            "-v",
            "--upgrade",
            "six",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.network_retry_limit, Some(5));
        assert_eq!(cli.args, vec!["install", "-v", "--upgrade", "six"]);
    }

    #[test]
    fn non_install_is_forwarded() {
        let cli = Cli::parse_from(["accel", "freeze", "--all"]);
        assert!(!cli.is_install());
    }

    #[test]
    fn overrides_only_set_given_flags() {
        let cli = Cli::parse_from(["accel", "--remote-readonly", "install", "six"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.remote_readonly, Some(true));
        assert_eq!(overrides.auto_remediate, None);
        assert!(overrides.cache_root.is_none());
    }

    #[test]
    fn boolean_flags_can_be_turned_off() {
        let cli = Cli::parse_from([
            "accel",
            "--remote-readonly=false",
            "-y",
            "install",
            "six",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.remote_readonly, Some(false));
        assert_eq!(overrides.auto_remediate, Some(true));
        assert_eq!(cli.args, vec!["install", "six"]);

        let cli = Cli::parse_from(["accel", "--auto-remediate=no", "install", "six"]);
        assert_eq!(cli.overrides().auto_remediate, Some(false));
    }

    #[test]
    fn explicit_false_beats_environment() {
        let mut config = crate::config::Config::default();
        config
            .apply_env(|key| (key == "ACCEL_REMOTE_READONLY").then(|| "1".to_string()))
            .unwrap();
        assert!(config.remote.readonly);

        let cli = Cli::parse_from(["accel", "--remote-readonly=false", "install", "six"]);
        config.apply_overrides(&cli.overrides());
        assert!(!config.remote.readonly);
    }

    #[test]
    fn args_are_required() {
        assert!(Cli::try_parse_from(["accel"]).is_err());
    }
}
