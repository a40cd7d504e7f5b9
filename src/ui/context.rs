//! UI context for detecting interactive vs CI environments

use std::io::IsTerminal;

/// CI indicators that imply nobody is around to answer a prompt
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "BUILDKITE",
    "TEAMCITY_VERSION",
    "TF_BUILD",
];

/// UI context that determines output and prompt behavior
#[derive(Debug, Clone)]
pub struct UiContext {
    /// Whether stderr and stdin are attached to a terminal outside CI
    interactive: bool,
    /// Whether confirmations are answered "yes" without asking
    auto_confirm: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self {
            interactive: Self::detect_interactive(),
            auto_confirm: false,
        }
    }

    /// Create a non-interactive context (for testing or explicit CI mode)
    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_confirm: false,
        }
    }

    /// Answer every confirmation with "yes"
    pub fn with_auto_confirm(mut self, yes: bool) -> Self {
        self.auto_confirm = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_confirm(&self) -> bool {
        self.auto_confirm
    }

    /// Spinners and colored steps only make sense on a terminal
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }

    fn detect_interactive() -> bool {
        // Status output goes to stderr; stdout may be piped into a log
        if !std::io::stderr().is_terminal() || !std::io::stdin().is_terminal() {
            return false;
        }
        !CI_VARS.iter().any(|var| std::env::var_os(var).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_context() {
        let ctx = UiContext::non_interactive();
        assert!(!ctx.is_interactive());
        assert!(!ctx.auto_confirm());
        assert!(!ctx.use_fancy_output());
    }

    #[test]
    fn with_auto_confirm() {
        let ctx = UiContext::non_interactive().with_auto_confirm(true);
        assert!(ctx.auto_confirm());
    }
}
