//! Install command - accelerated `pip install`

use crate::config::Config;
use crate::error::AccelResult;
use crate::orchestration::Orchestrator;
use crate::ui::{self, UiContext};
use std::time::Instant;
use tracing::info;

/// Execute an accelerated install
pub async fn execute(args: &[String], config: &Config, ctx: &UiContext) -> AccelResult<()> {
    let started = Instant::now();
    ui::intro(ctx, "accel");

    let orchestrator = Orchestrator::from_config(config, ctx.clone()).await?;
    let report = orchestrator.run(args).await?;

    for requirement in &report.requirements {
        info!("Installed {}", requirement);
    }
    if report.network_fetches == 0 && report.built == 0 {
        ui::remark(ctx, "Everything came from the local caches");
    } else {
        ui::step_info(
            ctx,
            &format!(
                "{} built, {} from cache, {} download {}",
                report.built,
                report.cache_hits,
                report.network_fetches,
                if report.network_fetches == 1 { "attempt" } else { "attempts" }
            ),
        );
    }

    let count = report.requirements.len();
    ui::outro_success(
        ctx,
        &format!(
            "Installed {} {} in {:.1}s",
            count,
            if count == 1 { "requirement" } else { "requirements" },
            started.elapsed().as_secs_f64()
        ),
    );
    Ok(())
}
