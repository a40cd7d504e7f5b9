//! accel - Accelerator for pip
//!
//! CLI entry point: accelerates `install`, forwards everything else.

use accel::cli::{commands, Cli};
use accel::config::{Config, ConfigManager};
use accel::error::AccelResult;
use accel::orchestration::{error_output_tail, until_interrupted};
use accel::ui::UiContext;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(output) = e.captured_output() {
                eprintln!("{}", style("Output (last lines):").dim());
                eprintln!("{}", error_output_tail(output));
            }
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> AccelResult<u8> {
    let cli = Cli::parse();
    let config = load_config(&cli).await?;
    init_logging(cli.verbose, &config);
    debug!("Data directory: {}", config.data_dir().display());

    if !cli.is_install() {
        let code = commands::forward(&cli.args, &config).await?;
        return Ok(u8::try_from(code).unwrap_or(1));
    }

    let ctx = UiContext::detect();
    until_interrupted(commands::install(&cli.args, &config, &ctx)).await?;
    Ok(0)
}

/// Files, then environment, then flags
async fn load_config(cli: &Cli) -> AccelResult<Config> {
    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = manager.load_merged().await?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.apply_overrides(&cli.overrides());
    if let Some(ref format) = cli.log_format {
        config.general.log_format = format.clone();
    }
    Ok(config)
}

/// 0 = warn (spinners only), 1 = info, 2+ = debug; RUST_LOG wins when set
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 => "accel=warn",
        1 => "accel=info",
        _ => "accel=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
