//! Target interpreter probing
//!
//! Cache keys depend on the interpreter ABI and platform, and binary
//! archives are installed relative to the interpreter's prefix. All three
//! come from asking the interpreter, unless configuration pins them.

use crate::config::schema::BuildConfig;
use crate::error::{AccelError, AccelResult};
use crate::orchestration::{CommandSpec, ProcessRunner};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const PROBE_SCRIPT: &str = "\
import sys, sysconfig
print(sys.implementation.name)
print('%d.%d' % sys.version_info[:2])
print(sysconfig.get_platform())
print(sys.prefix)
print(sys.executable)";

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tags and paths describing the install target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeTags {
    /// Interpreter tag, e.g. `cp312`
    pub runtime_tag: String,
    /// Platform tag, e.g. `linux_x86_64`
    pub platform_tag: String,
    /// Installation prefix (virtualenv root or `/usr`)
    pub prefix: PathBuf,
    /// Interpreter written into rewritten script hashbangs
    pub python: PathBuf,
}

impl RuntimeTags {
    /// Probe `config.python`, then apply configured overrides
    pub async fn probe(runner: &dyn ProcessRunner, config: &BuildConfig) -> AccelResult<Self> {
        let spec = CommandSpec::new(&config.python)
            .args(["-c", PROBE_SCRIPT])
            .timeout(PROBE_TIMEOUT);
        let output = runner.run(&spec).await?;
        if !output.success() {
            return Err(AccelError::RuntimeProbe(format!(
                "{} exited unsuccessfully: {}",
                config.python,
                output.transcript()
            )));
        }

        let mut tags = Self::parse(&output.lines)?;
        if let Some(ref tag) = config.runtime_tag {
            tags.runtime_tag = tag.clone();
        }
        if let Some(ref tag) = config.platform_tag {
            tags.platform_tag = tag.clone();
        }
        if let Some(ref prefix) = config.install_prefix {
            tags.prefix = prefix.clone();
        }
        debug!(
            "Runtime {} on {} with prefix {}",
            tags.runtime_tag,
            tags.platform_tag,
            tags.prefix.display()
        );
        Ok(tags)
    }

    fn parse(lines: &[String]) -> AccelResult<Self> {
        let fields: Vec<&str> = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect();
        let &[implementation, version, platform, prefix, executable] = fields.as_slice() else {
            return Err(AccelError::RuntimeProbe(format!(
                "unexpected interpreter output: {:?}",
                lines
            )));
        };

        let abbreviation = match implementation {
            "cpython" => "cp",
            "pypy" => "pp",
            "ironpython" => "ip",
            "jython" => "jy",
            other => other,
        };

        Ok(Self {
            runtime_tag: format!("{}{}", abbreviation, version.replace('.', "")),
            platform_tag: platform.replace(['-', '.'], "_"),
            prefix: PathBuf::from(prefix),
            python: PathBuf::from(executable),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::runner::testing::{exited, FakeRunner};

    fn cpython() -> FakeRunner {
        FakeRunner::new(|_| {
            exited(
                0,
                &[
                    "cpython",
                    "3.12",
                    "linux-x86_64",
                    "/home/ci/venv",
                    "/home/ci/venv/bin/python",
                ],
            )
        })
    }

    #[tokio::test]
    async fn probes_tags_from_interpreter() {
        let tags = RuntimeTags::probe(&cpython(), &BuildConfig::default())
            .await
            .unwrap();
        assert_eq!(tags.runtime_tag, "cp312");
        assert_eq!(tags.platform_tag, "linux_x86_64");
        assert_eq!(tags.prefix, PathBuf::from("/home/ci/venv"));
        assert_eq!(tags.python, PathBuf::from("/home/ci/venv/bin/python"));
    }

    #[tokio::test]
    async fn overrides_win() {
        let config = BuildConfig {
            platform_tag: Some("manylinux_2_39_x86_64".into()),
            install_prefix: Some(PathBuf::from("/opt/app")),
            ..BuildConfig::default()
        };
        let tags = RuntimeTags::probe(&cpython(), &config).await.unwrap();
        assert_eq!(tags.runtime_tag, "cp312");
        assert_eq!(tags.platform_tag, "manylinux_2_39_x86_64");
        assert_eq!(tags.prefix, PathBuf::from("/opt/app"));
    }

    #[tokio::test]
    async fn pypy_and_macos_platforms() {
        let runner = FakeRunner::new(|_| {
            exited(
                0,
                &["pypy", "3.10", "macosx-14.0-arm64", "/venv", "/venv/bin/pypy3"],
            )
        });
        let tags = RuntimeTags::probe(&runner, &BuildConfig::default())
            .await
            .unwrap();
        assert_eq!(tags.runtime_tag, "pp310");
        assert_eq!(tags.platform_tag, "macosx_14_0_arm64");
    }

    #[tokio::test]
    async fn failing_interpreter_is_probe_error() {
        let runner = FakeRunner::new(|_| exited(127, &["python3: not found"]));
        assert!(matches!(
            RuntimeTags::probe(&runner, &BuildConfig::default()).await,
            Err(AccelError::RuntimeProbe(_))
        ));
    }

    #[tokio::test]
    async fn garbled_output_is_probe_error() {
        let runner = FakeRunner::new(|_| exited(0, &["cpython"]));
        assert!(RuntimeTags::probe(&runner, &BuildConfig::default())
            .await
            .is_err());
    }
}
