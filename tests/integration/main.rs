//! Integration tests for accel

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn accel() -> Command {
        cargo_bin_cmd!("accel")
    }

    #[test]
    fn help_displays() {
        accel()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Accelerator for pip"));
    }

    #[test]
    fn version_displays() {
        accel()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("accel"));
    }

    #[test]
    fn package_manager_args_are_required() {
        accel().assert().failure();
    }
}

#[cfg(unix)]
mod pipeline_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Write an executable shell script
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// accel with fake pip/python and every config source pointed into `temp`
    fn accel_in(temp: &TempDir, pip_body: &str) -> Command {
        let pip = script(temp.path(), "pip", pip_body);
        let python = script(
            temp.path(),
            "python",
            "printf 'cpython\\n3.12\\nlinux-x86_64\\n%s\\n%s\\n' \"$PWD\" \"$0\"",
        );
        let mut cmd = cargo_bin_cmd!("accel");
        cmd.env_clear()
            .env("PATH", "/usr/bin:/bin")
            .env("HOME", temp.path())
            .env("XDG_CONFIG_HOME", temp.path().join("config"))
            .env("ACCEL_PIP", pip)
            .env("ACCEL_PYTHON", python)
            .env("ACCEL_CACHE_ROOT", temp.path().join("data"))
            .current_dir(temp.path());
        cmd
    }

    #[test]
    fn non_install_commands_are_forwarded() {
        let temp = TempDir::new().unwrap();
        accel_in(&temp, "echo \"forwarded: $*\"; exit 7")
            .args(["freeze", "--all"])
            .assert()
            .code(7)
            .stdout(predicate::str::contains("forwarded: freeze --all"));
    }

    #[test]
    fn invalid_environment_value_is_config_error() {
        let temp = TempDir::new().unwrap();
        accel_in(&temp, "exit 0")
            .env("ACCEL_NETWORK_RETRY_LIMIT", "lots")
            .args(["list"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("ACCEL_NETWORK_RETRY_LIMIT"));
    }

    #[test]
    fn download_failures_stop_at_retry_limit() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("pip.log");
        let body = format!(
            "echo \"$*\" >> '{}'\necho 'Could not fetch URL: connection refused'\nexit 1",
            log.display()
        );
        accel_in(&temp, &body)
            .env("ACCEL_NETWORK_RETRY_LIMIT", "2")
            .args(["install", "six"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("after 2 attempt(s)"))
            .stderr(predicate::str::contains("connection refused"));

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("--no-index"));
        assert!(!lines[1].contains("--no-index"));
        assert!(!lines[2].contains("--no-index"));
    }

    #[test]
    fn unrecognised_transcript_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        accel_in(&temp, "echo 'Successfully did something new'; exit 0")
            .args(["install", "six"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("did not match"));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let temp = TempDir::new().unwrap();
        accel_in(&temp, "exit 0")
            .args(["--config", "/nonexistent/accel.toml", "list"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("file not found"));
    }
}

#[cfg(unix)]
mod interrupt_tests {
    use accel::error::AccelError;
    use accel::orchestration::{until_interrupted, CommandSpec, ProcessRunner, SystemRunner};
    use std::time::Duration;

    // The only test in this binary that signals its own process
    #[tokio::test]
    async fn ctrl_c_between_subprocesses_interrupts() {
        // A subprocess run leaves tokio's SIGINT handler installed
        let out = SystemRunner
            .run(&CommandSpec::new("true"))
            .await
            .unwrap();
        assert_eq!(out.code, Some(0));

        let work = until_interrupted(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, AccelError>(())
        });
        let raise = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            // SAFETY: raising SIGINT on ourselves; tokio's handler is installed
            unsafe { libc::raise(libc::SIGINT) };
            std::future::pending::<()>().await
        };

        let result = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::select! {
                result = work => result,
                _ = raise => unreachable!(),
            }
        })
        .await
        .expect("interrupt was swallowed");
        assert!(matches!(result, Err(AccelError::Interrupted)));
    }
}
