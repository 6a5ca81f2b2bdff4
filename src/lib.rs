//! Cross-distribution provisioning engine for the platform stack.
//!
//! Resolves the host into an OS-family profile, maps logical resource
//! names to distribution-specific ones, and drives a fixed pipeline of
//! idempotent installation phases: pre-flight validation, system
//! dependencies, database setup, repository checkout, and service
//! rollout. An uninstaller with granular scopes undoes the work.

pub mod cli;
pub mod commands;
pub mod config_file;
pub mod context;
pub mod error;
pub mod exec;
pub mod logging;
pub mod phases;
pub mod platform;
pub mod resolve;
pub mod services;
pub mod uninstall;
pub mod unit;
