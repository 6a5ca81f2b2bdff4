//! Subcommand entry points.

pub mod install;
pub mod uninstall;
