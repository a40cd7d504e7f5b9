//! accel - Accelerator for pip
//!
//! Keeps a local index of source distributions and a tiered cache of
//! binary distributions, so provisioning the same requirements again
//! needs neither the network nor a compiler.

pub mod cache;
pub mod cli;
pub mod config;
pub mod dist;
pub mod error;
pub mod extract;
pub mod orchestration;
pub mod remediation;
pub mod runtime;
pub mod ui;

pub use error::{AccelError, AccelResult};
