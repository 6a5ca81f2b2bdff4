//! Phase 1: pre-flight validation and configuration display.

use crate::context::Context;
use crate::phases::{Phase, PhaseOutcome};

/// Validates the environment before anything is mutated: root privileges,
/// OS version gate, and the collected settings.
pub struct FrameworkInit;

impl Phase for FrameworkInit {
    fn name(&self) -> &'static str {
        "Framework Init"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome> {
        ctx.log.info(&format!(
            "Detected {} ({} family, {})",
            ctx.profile.pretty_name,
            ctx.profile.os_family,
            ctx.profile.package_manager.binary()
        ));

        ctx.profile.check_version_supported()?;

        if !running_as_root(ctx) {
            if ctx.dry_run {
                ctx.log
                    .warn("Not running as root; continuing because this is a dry run");
            } else {
                anyhow::bail!("this installer must run as root (try sudo)");
            }
        }

        ctx.validate()?;

        ctx.log.info("Configuration:");
        let summary = serde_json::to_string_pretty(&ctx.summary())
            .unwrap_or_else(|_| "<unrenderable>".to_string());
        for line in summary.lines() {
            ctx.log.info(&format!("  {line}"));
        }

        if ctx.dry_run {
            ctx.log.dry_run("Validation complete; no changes will be applied");
            return Ok(PhaseOutcome::DryRun);
        }
        Ok(PhaseOutcome::Ok)
    }
}

fn running_as_root(ctx: &Context) -> bool {
    ctx.executor
        .run_unchecked("id", &["-u"])
        .is_ok_and(|r| r.success && r.stdout.trim() == "0")
}
