// src/commands/mod.rs
//! Command handlers for the pantry CLI

mod fetch;
mod install;
mod validate;

pub use fetch::cmd_fetch;
pub use install::cmd_install;
pub use validate::cmd_validate;
