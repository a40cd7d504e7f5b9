//! Forward command - hand non-install invocations to the package manager

use crate::config::Config;
use crate::error::AccelResult;
use crate::orchestration::{run_passthrough, CommandSpec};

/// Run the package manager with `args` unchanged, returning its exit code
pub async fn execute(args: &[String], config: &Config) -> AccelResult<i32> {
    let spec = CommandSpec::new(&config.build.package_manager).args(args.iter().cloned());
    run_passthrough(&spec).await
}
