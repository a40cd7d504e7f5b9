//! Interactive prompts with CI/non-interactive fallback

use super::context::UiContext;
use crate::error::{AccelError, AccelResult};
use console::style;

/// Ask for confirmation
///
/// Auto-confirm answers yes. A non-interactive context returns `default`
/// without prompting.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> AccelResult<bool> {
    if ctx.auto_confirm() {
        eprintln!("  {} {}", message, style("(auto-approved)").dim());
        return Ok(true);
    }

    if !ctx.is_interactive() {
        return Ok(default);
    }

    // cliclack blocks on the terminal
    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| AccelError::Internal(format!("Prompt task failed: {}", e)))?
    .map_err(|e| AccelError::io("reading confirmation", e))
}
