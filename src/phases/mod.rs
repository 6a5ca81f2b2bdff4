//! Installation phases and their sequential orchestration.
//!
//! The installer is a fixed pipeline of five phases. Each phase is
//! idempotent: it may be skipped when its goal state already holds, and
//! re-running a completed installation converges instead of erroring. The
//! orchestrator stops at the first failure; phases behind the failed one
//! are reported as never reached, not as failed.

mod database;
mod framework_init;
mod repos;
mod services;
mod system_deps;

pub use database::DatabaseSetup;
pub use framework_init::FrameworkInit;
pub use repos::RepoCheckout;
pub use services::ServiceRollout;
pub use system_deps::SystemDependencies;

use crate::context::Context;
use crate::error::{InstallError, PlatformError, ProvisionError, ServiceError};
use crate::logging::PhaseStatus;

/// What a completed phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Phase applied its changes.
    Ok,
    /// Goal state already held; nothing to do.
    Skipped(String),
    /// Dry run: actions were computed and logged, not applied.
    DryRun,
}

/// Terminal state of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every phase completed.
    Completed,
    /// A phase failed and the pipeline stopped.
    Aborted {
        /// Name of the failed phase.
        phase: &'static str,
    },
}

/// One step of the installation pipeline.
pub trait Phase {
    /// Stable phase name used in logs and summaries.
    fn name(&self) -> &'static str;

    /// Whether the phase's goal state already holds.
    ///
    /// A `true` answer lets the orchestrator skip the phase entirely.
    fn is_satisfied(&self, _ctx: &Context) -> bool {
        false
    }

    /// Execute the phase.
    ///
    /// # Errors
    ///
    /// Any error aborts the pipeline; phases must leave the system in a
    /// state a re-run can converge from.
    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome>;
}

/// Runs phases in order, stopping at the first failure.
pub struct Orchestrator {
    phases: Vec<Box<dyn Phase>>,
}

impl Orchestrator {
    /// The standard five-phase installation pipeline.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            phases: vec![
                Box::new(FrameworkInit),
                Box::new(SystemDependencies),
                Box::new(DatabaseSetup),
                Box::new(RepoCheckout),
                Box::new(ServiceRollout),
            ],
        }
    }

    #[must_use]
    pub const fn with_phases(phases: Vec<Box<dyn Phase>>) -> Self {
        Self { phases }
    }

    /// Run every phase in order.
    ///
    /// The first failure stops the pipeline: the failing phase is recorded
    /// as failed with its error message, all later phases as not reached,
    /// and the error's remediation hint (when one exists) is logged.
    #[must_use = "the outcome decides the process exit status"]
    pub fn run(&self, ctx: &Context) -> RunOutcome {
        let total = self.phases.len();
        for (index, phase) in self.phases.iter().enumerate() {
            ctx.log
                .stage(&format!("[{}/{total}] {}", index + 1, phase.name()));

            if phase.is_satisfied(ctx) {
                ctx.log.info("Already satisfied, skipping");
                ctx.log
                    .record_phase(phase.name(), PhaseStatus::Skipped, Some("already satisfied"));
                continue;
            }

            match phase.run(ctx) {
                Ok(PhaseOutcome::Ok) => {
                    ctx.log.record_phase(phase.name(), PhaseStatus::Ok, None);
                }
                Ok(PhaseOutcome::Skipped(reason)) => {
                    ctx.log
                        .record_phase(phase.name(), PhaseStatus::Skipped, Some(&reason));
                }
                Ok(PhaseOutcome::DryRun) => {
                    ctx.log
                        .record_phase(phase.name(), PhaseStatus::DryRun, None);
                }
                Err(error) => {
                    ctx.log.error(&format!("{} failed: {error:#}", phase.name()));
                    if let Some(hint) = remediation_hint(&error) {
                        ctx.log.warn(&hint);
                    }
                    ctx.log.record_phase(
                        phase.name(),
                        PhaseStatus::Failed,
                        Some(&format!("{error:#}")),
                    );
                    for later in self.phases.iter().skip(index + 1) {
                        ctx.log
                            .record_phase(later.name(), PhaseStatus::NotReached, None);
                    }
                    return RunOutcome::Aborted { phase: phase.name() };
                }
            }
        }
        RunOutcome::Completed
    }
}

/// Map well-known failure shapes to an operator-facing next step.
fn remediation_hint(error: &anyhow::Error) -> Option<String> {
    if let Some(provision) = error.downcast_ref::<ProvisionError>() {
        return match provision {
            ProvisionError::Platform(p) => platform_hint(p),
            ProvisionError::Service(s) => service_hint(s),
            ProvisionError::Install(i) => install_hint(i),
            ProvisionError::ConfigFile(_) => None,
        };
    }
    if let Some(platform) = error.downcast_ref::<PlatformError>() {
        return platform_hint(platform);
    }
    if let Some(service) = error.downcast_ref::<ServiceError>() {
        return service_hint(service);
    }
    if let Some(install) = error.downcast_ref::<InstallError>() {
        return install_hint(install);
    }
    None
}

fn platform_hint(error: &PlatformError) -> Option<String> {
    match error {
        PlatformError::UnsupportedOsVersion { minimum, .. } => Some(format!(
            "Upgrade the operating system to version {minimum} or newer and re-run"
        )),
        PlatformError::PackageManagerNotFound { tried, .. } => Some(format!(
            "Install one of the expected package managers ({tried}) and re-run"
        )),
        PlatformError::UnsupportedPlatform(_) => None,
    }
}

fn service_hint(error: &ServiceError) -> Option<String> {
    match error {
        ServiceError::NotReady { service, .. } | ServiceError::StartFailed { service, .. } => {
            Some(format!(
                "Inspect the service with: journalctl -u {service} -n 50"
            ))
        }
    }
}

fn install_hint(error: &InstallError) -> Option<String> {
    match error {
        InstallError::AuthenticationRequired { .. } => Some(
            "Verify local postgres superuser access with: sudo -u postgres psql -c 'SELECT 1'"
                .to_string(),
        ),
        InstallError::DependencyInstall { package, .. } => Some(format!(
            "Install {package} manually with the system package manager and re-run"
        )),
        InstallError::PhaseFailed { .. } => None,
    }
}
