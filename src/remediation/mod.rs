//! Missing system dependency detection and remediation
//!
//! When a native build fails, its output is matched against an ordered rule
//! table mapping error signatures (missing headers, missing `*-config`
//! tools) to system packages. Only the Debian family is supported; elsewhere
//! remediation is a no-op.

use crate::config::schema::{RemediationConfig, RemediationRule};
use crate::error::{AccelError, AccelResult};
use crate::orchestration::{CommandSpec, ProcessRunner};
use crate::ui::{self, UiContext};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const APT_TIMEOUT: Duration = Duration::from_secs(1800);

/// Bundled rules for Debian and Ubuntu
pub fn debian_rules() -> Vec<RemediationRule> {
    const RULES: &[(&str, &[&str])] = &[
        (r"libxml/xmlversion\.h", &["libxml2-dev"]),
        (r"libxslt/xsltconfig\.h|xslt-config", &["libxslt1-dev"]),
        (r"openssl/(ssl|opensslv)\.h", &["libssl-dev"]),
        (r"ffi\.h", &["libffi-dev"]),
        (r"Python\.h", &["python3-dev"]),
        (r"mysql_config", &["libmysqlclient-dev"]),
        (r"pg_config", &["libpq-dev"]),
        (r"yaml\.h", &["libyaml-dev"]),
        (r"jpeglib\.h", &["libjpeg-dev"]),
        (r"zlib\.h", &["zlib1g-dev"]),
        (r"mcrypt\.h", &["libmcrypt-dev"]),
        (r"sasl/sasl\.h", &["libsasl2-dev"]),
        (r"lber\.h|ldap\.h", &["libldap2-dev"]),
        (r"sqlite3\.h", &["libsqlite3-dev"]),
        (r"freetype/|ft2build\.h", &["libfreetype-dev"]),
        (r"unable to execute 'swig'|swig: not found", &["swig"]),
        (r"unable to execute 'gcc'|gcc: not found|command 'gcc' failed", &["build-essential"]),
    ];

    RULES
        .iter()
        .map(|(pattern, packages)| RemediationRule {
            pattern: pattern.to_string(),
            packages: packages.iter().map(|p| p.to_string()).collect(),
        })
        .collect()
}

/// Operating system family, for picking the system package manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsFamily {
    Debian,
    Other(String),
}

impl OsFamily {
    pub fn detect() -> Self {
        match std::fs::read_to_string("/etc/os-release") {
            Ok(content) => Self::from_os_release(&content),
            Err(_) if Path::new("/etc/debian_version").exists() => Self::Debian,
            Err(_) => Self::Other(std::env::consts::OS.to_string()),
        }
    }

    /// Classify from `/etc/os-release` contents (`ID` and `ID_LIKE`)
    pub fn from_os_release(content: &str) -> Self {
        let mut ids = Vec::new();
        for line in content.lines() {
            if let Some(value) = line
                .strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
            {
                ids.extend(
                    value
                        .trim_matches(|c| c == '"' || c == '\'')
                        .split_whitespace()
                        .map(str::to_lowercase),
                );
            }
        }
        if ids.iter().any(|id| id == "debian" || id == "ubuntu") {
            Self::Debian
        } else {
            Self::Other(ids.first().cloned().unwrap_or_else(|| "unknown".to_string()))
        }
    }
}

/// What the resolver managed to do about a build failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// These packages were installed; the build is worth retrying
    Remediated(Vec<String>),
    NotApplicable(String),
}

pub struct SystemDependencyResolver {
    rules: Vec<(Regex, Vec<String>)>,
    os_family: OsFamily,
    runner: Arc<dyn ProcessRunner>,
    ui: UiContext,
    use_sudo: bool,
}

impl SystemDependencyResolver {
    pub fn new(
        config: &RemediationConfig,
        os_family: OsFamily,
        runner: Arc<dyn ProcessRunner>,
        ui: UiContext,
    ) -> AccelResult<Self> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.packages.clone()))
                    .map_err(|e| AccelError::PatternInvalid {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<AccelResult<Vec<_>>>()?;

        Ok(Self {
            rules,
            os_family,
            runner,
            ui: ui.with_auto_confirm(config.auto_remediate),
            use_sudo: !crate::config::is_root(),
        })
    }

    /// Disable the `sudo` prefix (already root, or tests)
    pub fn without_sudo(mut self) -> Self {
        self.use_sudo = false;
        self
    }

    /// Packages named by the first rule matching `output`
    pub fn candidates(&self, output: &str) -> Option<&[String]> {
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(output))
            .map(|(_, packages)| packages.as_slice())
    }

    /// Try to fix the failure described by `build_output`
    pub async fn remediate(&self, build_output: &str) -> AccelResult<RemediationOutcome> {
        if self.os_family != OsFamily::Debian {
            return Ok(RemediationOutcome::NotApplicable(format!(
                "automatic installation of system packages is not supported on {:?}",
                self.os_family
            )));
        }

        let Some(candidates) = self.candidates(build_output) else {
            return Ok(RemediationOutcome::NotApplicable(
                "no known missing system dependency in the build output".to_string(),
            ));
        };

        let missing = match self.missing_packages(candidates).await {
            Ok(missing) => missing,
            Err(e) => return not_started(e),
        };
        if missing.is_empty() {
            return Ok(RemediationOutcome::NotApplicable(format!(
                "required system packages already installed: {}",
                candidates.join(", ")
            )));
        }

        let prompt = format!(
            "Missing system {}: {}. Install with apt-get?",
            if missing.len() == 1 { "package" } else { "packages" },
            missing.join(", ")
        );
        if !ui::confirm(&self.ui, &prompt, false).await? {
            return Ok(RemediationOutcome::NotApplicable(format!(
                "installation of {} was declined",
                missing.join(", ")
            )));
        }

        let spec = self.install_command(&missing);
        info!("Installing system packages: {}", spec.display());
        // Attached so a sudo password prompt reaches the terminal
        let output = match self.runner.run_attached(&spec).await {
            Ok(output) => output,
            Err(e) => return not_started(e),
        };
        if !output.success() {
            warn!("System package installation failed");
            let detail = if output.timed_out {
                format!("timed out after {:?}", APT_TIMEOUT)
            } else if output.lines.is_empty() {
                match output.code {
                    Some(code) => format!("exited with code {}", code),
                    None => "killed by a signal".to_string(),
                }
            } else {
                crate::orchestration::error_output_tail(&output.transcript())
            };
            return Ok(RemediationOutcome::NotApplicable(format!(
                "`{}` failed: {}",
                spec.display(),
                detail
            )));
        }
        Ok(RemediationOutcome::Remediated(missing))
    }

    /// Filter `packages` down to those dpkg doesn't report as installed
    async fn missing_packages(&self, packages: &[String]) -> AccelResult<Vec<String>> {
        let spec = CommandSpec::new("dpkg-query")
            .args(["--show", "--showformat=${Package} ${Status}\\n"])
            .args(packages.iter().cloned());
        // Exits non-zero when some package is unknown; the listing is still valid
        let output = self.runner.run(&spec).await?;

        let installed: HashSet<&str> = output
            .lines
            .iter()
            .filter(|line| line.trim_end().ends_with("install ok installed"))
            .filter_map(|line| line.split_whitespace().next())
            .map(|name| name.split(':').next().unwrap_or(name))
            .collect();
        debug!("Installed among candidates: {:?}", installed);

        Ok(packages
            .iter()
            .filter(|p| !installed.contains(p.as_str()))
            .cloned()
            .collect())
    }

    fn install_command(&self, packages: &[String]) -> CommandSpec {
        // sudo resets the environment, so the frontend is passed through it.
        // Without a terminal nobody can type a password: fail instead of waiting.
        let spec = if self.use_sudo {
            let sudo = CommandSpec::new("sudo");
            let sudo = if self.ui.is_interactive() { sudo } else { sudo.arg("-n") };
            sudo.args(["DEBIAN_FRONTEND=noninteractive", "apt-get"])
        } else {
            CommandSpec::new("apt-get").env("DEBIAN_FRONTEND", "noninteractive")
        };
        spec.args(["install", "--yes"])
            .args(packages.iter().cloned())
            .timeout(APT_TIMEOUT)
    }
}

/// A remediation command that could not be spawned is a missing remedy,
/// not an accel failure
fn not_started(error: AccelError) -> AccelResult<RemediationOutcome> {
    match error {
        AccelError::CommandFailed { command, source } => {
            warn!("Could not start `{}`: {}", command, source);
            Ok(RemediationOutcome::NotApplicable(format!(
                "`{}` could not be started: {}",
                command, source
            )))
        }
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::runner::testing::{exited, FakeRunner};

    const LXML_FAILURE: &str =
        "src/lxml/includes/etree_defs.h:14:10: fatal error: libxml/xmlversion.h: No such file or directory";

    fn resolver(runner: Arc<FakeRunner>, auto: bool, os: OsFamily) -> SystemDependencyResolver {
        let config = RemediationConfig {
            auto_remediate: auto,
            ..RemediationConfig::default()
        };
        SystemDependencyResolver::new(&config, os, runner, UiContext::non_interactive())
            .unwrap()
            .without_sudo()
    }

    fn nothing_installed() -> Arc<FakeRunner> {
        Arc::new(FakeRunner::new(|spec| match spec.program.as_str() {
            "dpkg-query" => exited(1, &["dpkg-query: no packages found matching libxml2-dev"]),
            _ => exited(0, &[]),
        }))
    }

    #[test]
    fn os_release_detection() {
        assert_eq!(
            OsFamily::from_os_release("NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n"),
            OsFamily::Debian
        );
        assert_eq!(
            OsFamily::from_os_release("ID=\"linuxmint\"\nID_LIKE=\"ubuntu debian\"\n"),
            OsFamily::Debian
        );
        assert_eq!(
            OsFamily::from_os_release("ID=fedora\n"),
            OsFamily::Other("fedora".into())
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let r = resolver(nothing_installed(), false, OsFamily::Debian);
        assert_eq!(
            r.candidates(LXML_FAILURE),
            Some(&["libxml2-dev".to_string()][..])
        );
        assert!(r.candidates("error: something else entirely").is_none());
    }

    #[tokio::test]
    async fn auto_remediate_installs_missing_packages() {
        let runner = nothing_installed();
        let r = resolver(runner.clone(), true, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert_eq!(
            outcome,
            RemediationOutcome::Remediated(vec!["libxml2-dev".into()])
        );

        let calls = runner.calls();
        let install = calls.last().unwrap();
        assert_eq!(install.program, "apt-get");
        assert_eq!(install.args, vec!["install", "--yes", "libxml2-dev"]);
    }

    #[tokio::test]
    async fn non_interactive_without_auto_declines() {
        let runner = nothing_installed();
        let r = resolver(runner.clone(), false, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(_)));
        assert!(runner.calls().iter().all(|c| c.program != "apt-get"));
    }

    #[tokio::test]
    async fn installed_packages_are_not_applicable() {
        let runner = Arc::new(FakeRunner::new(|_| {
            exited(0, &["libxml2-dev install ok installed"])
        }));
        let r = resolver(runner, true, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(reason) if reason.contains("already installed")));
    }

    #[tokio::test]
    async fn other_os_is_a_no_op() {
        let runner = nothing_installed();
        let r = resolver(runner.clone(), true, OsFamily::Other("fedora".into()));
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_apt_get_is_not_applicable() {
        let runner = Arc::new(FakeRunner::new(|spec| match spec.program.as_str() {
            "dpkg-query" => exited(1, &[]),
            _ => exited(100, &["E: Unable to locate package libxml2-dev"]),
        }));
        let r = resolver(runner, true, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(reason) if reason.contains("Unable to locate")));
    }

    #[test]
    fn invalid_rule_pattern_is_rejected() {
        let config = RemediationConfig {
            auto_remediate: false,
            rules: vec![RemediationRule {
                pattern: "([".into(),
                packages: vec!["x".into()],
            }],
        };
        let result = SystemDependencyResolver::new(
            &config,
            OsFamily::Debian,
            nothing_installed(),
            UiContext::non_interactive(),
        );
        assert!(matches!(result, Err(AccelError::PatternInvalid { .. })));
    }

    #[test]
    fn sudo_prefix_when_not_root() {
        let r = resolver(nothing_installed(), true, OsFamily::Debian);
        let r = SystemDependencyResolver { use_sudo: true, ..r };
        let spec = r.install_command(&["swig".to_string()]);
        assert_eq!(spec.program, "sudo");
        // Non-interactive: sudo must not wait for a password
        assert_eq!(
            spec.args[..3],
            ["-n", "DEBIAN_FRONTEND=noninteractive", "apt-get"]
        );
    }

    fn unstartable(program: &'static str) -> Arc<FakeRunner> {
        Arc::new(FakeRunner::fallible(move |spec| {
            if spec.program == program {
                return Err(AccelError::command_failed(
                    spec.display(),
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                ));
            }
            Ok(match spec.program.as_str() {
                "dpkg-query" => exited(1, &[]),
                _ => exited(0, &[]),
            })
        }))
    }

    #[tokio::test]
    async fn unstartable_apt_get_is_not_applicable() {
        let r = resolver(unstartable("apt-get"), true, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(
            outcome,
            RemediationOutcome::NotApplicable(reason) if reason.contains("could not be started")
        ));
    }

    #[tokio::test]
    async fn unstartable_dpkg_query_is_not_applicable() {
        let r = resolver(unstartable("dpkg-query"), true, OsFamily::Debian);
        let outcome = r.remediate(LXML_FAILURE).await.unwrap();
        assert!(matches!(outcome, RemediationOutcome::NotApplicable(_)));
    }

    #[tokio::test]
    async fn install_runs_attached_to_the_terminal() {
        let runner = nothing_installed();
        let r = resolver(runner.clone(), true, OsFamily::Debian);
        r.remediate(LXML_FAILURE).await.unwrap();
        assert_eq!(runner.attached_calls(), vec!["apt-get".to_string()]);
    }
}
