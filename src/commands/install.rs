//! The `install` subcommand: profile resolution, context assembly, and
//! the phase pipeline.

use std::sync::Arc;

use anyhow::Result;

use crate::cli::{GlobalOpts, InstallOpts};
use crate::context::{self, Context, Settings};
use crate::exec::{Executor, SystemExecutor};
use crate::logging::Logger;
use crate::phases::{Orchestrator, RunOutcome};
use crate::platform::PlatformProfile;

/// Run a full installation.
///
/// # Errors
///
/// Fails when the platform cannot be resolved or when any phase aborts
/// the pipeline.
pub fn run(global: &GlobalOpts, opts: &InstallOpts, log: &Arc<Logger>, verbose: bool) -> Result<()> {
    let executor: Arc<dyn Executor> = Arc::new(SystemExecutor);
    let profile = PlatformProfile::resolve(executor.as_ref())?;
    let settings = build_settings(opts, executor.as_ref(), log);

    let log_handle: Arc<dyn crate::logging::Log> = log.clone();
    let ctx = Context::new(profile, settings, log_handle, executor, global.dry_run, verbose);

    let outcome = Orchestrator::standard().run(&ctx);
    log.print_summary();

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Aborted { phase } => {
            anyhow::bail!("installation aborted during {phase}")
        }
    }
}

/// Fill in everything the operator did not pass explicitly: generated
/// credentials and the detected host address.
fn build_settings(opts: &InstallOpts, executor: &dyn Executor, log: &Arc<Logger>) -> Settings {
    let db_password = opts.db_password.clone().unwrap_or_else(|| {
        log.info("Generating database password");
        context::generate_password(32)
    });
    let host_ip = opts.host_ip.clone().unwrap_or_else(|| {
        let detected = context::detect_host_ip(executor);
        log.info(&format!("Detected host IP {detected}"));
        detected
    });

    Settings {
        db_host: opts.db_host.clone(),
        db_port: opts.db_port,
        db_user: opts.db_user.clone(),
        db_password,
        db_name: opts.db_name.clone(),
        host_ip,
        network_name: opts.network.clone(),
        backend_port: opts.backend_port,
        frontend_port: opts.frontend_port,
        install_dir: opts.install_dir.clone(),
        data_dir: opts.data_dir.clone(),
        cache_password: opts.cache_password.clone(),
        repo_base: opts.repo_base.clone(),
        skip_isos: opts.skip_isos,
        local_repo: opts.local_repo.clone(),
    }
}
