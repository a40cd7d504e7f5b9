//! CLI command implementations

pub mod forward;
pub mod install;

pub use forward::execute as forward;
pub use install::execute as install;
