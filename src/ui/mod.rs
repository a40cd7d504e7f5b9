//! Terminal UI
//!
//! Uses `cliclack` for spinners and prompts on a terminal, with plain
//! stderr lines in CI and other non-interactive environments.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{intro, outro_success, remark, step_info, step_ok};
pub use progress::TaskSpinner;
pub use prompts::confirm;
