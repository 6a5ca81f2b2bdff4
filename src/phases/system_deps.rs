//! Phase 2: package installation and base service startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::InstallError;
use crate::exec::Executor;
use crate::phases::{Phase, PhaseOutcome};
use crate::platform::{OsFamily, PackageManager};
use crate::resolve;
use crate::services::{ProbeObservation, ReadinessProbe, ServiceManager};

/// Logical package names the platform needs everywhere; resolved per
/// family before install.
const GENERIC_PACKAGES: &[&str] = &[
    "curl",
    "git",
    "nodejs",
    "npm",
    "postgresql-server",
    "postgresql-contrib",
    "redis",
    "build-essential",
    "openssl-dev",
    "qemu-kvm",
    "libvirt",
    "libvirt-clients",
    "virt-install",
    "cpu-checker",
];

/// Commands that must exist after installation.
const REQUIRED_COMMANDS: &[&str] = &["git", "node", "npm", "psql", "virsh", "qemu-system-x86_64"];

const CACHE_UPDATE_ATTEMPTS: u32 = 3;
const CACHE_UPDATE_DELAY: Duration = Duration::from_secs(5);

/// Installs OS packages, initializes the postgres cluster where the
/// distribution does not, and brings up the base services.
pub struct SystemDependencies;

impl Phase for SystemDependencies {
    fn name(&self) -> &'static str {
        "System Dependencies"
    }

    fn is_satisfied(&self, ctx: &Context) -> bool {
        REQUIRED_COMMANDS.iter().all(|cmd| ctx.executor.which(cmd))
            && ServiceManager::new(ctx.executor.clone(), ctx.log.clone(), ctx.dry_run)
                .is_active(&resolve::service_name("postgresql", ctx.profile.os_family))
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome> {
        let family = ctx.profile.os_family;
        let manager = ctx.profile.package_manager;

        let (packages, skipped) = resolve::resolve_packages(GENERIC_PACKAGES, family);
        for name in &skipped {
            ctx.log
                .debug(&format!("{name} has no equivalent on {family}, skipping"));
        }

        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "Would refresh the {} cache and install: {}",
                manager.binary(),
                packages.join(", ")
            ));
            ctx.log
                .dry_run("Would start postgresql, redis and libvirtd");
            return Ok(PhaseOutcome::DryRun);
        }

        update_package_cache(ctx, manager)?;
        install_packages(ctx, manager, &packages)?;
        verify_required_commands(ctx)?;
        check_kvm_support(ctx)?;
        initialize_postgres_cluster(ctx)?;

        let services = ServiceManager::new(ctx.executor.clone(), ctx.log.clone(), ctx.dry_run);
        for logical in ["postgresql", "redis", "libvirtd"] {
            services.ensure_running(&resolve::service_name(logical, family))?;
        }

        wait_for_postgres(ctx)?;
        Ok(PhaseOutcome::Ok)
    }
}

/// Refresh the package cache, retrying transient mirror failures.
fn update_package_cache(ctx: &Context, manager: PackageManager) -> anyhow::Result<()> {
    update_package_cache_with(ctx, manager, CACHE_UPDATE_DELAY)
}

fn update_package_cache_with(
    ctx: &Context,
    manager: PackageManager,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    ctx.log
        .info(&format!("Refreshing {} package cache", manager.binary()));
    let mut last_detail = String::new();
    for attempt in 1..=CACHE_UPDATE_ATTEMPTS {
        let result = ctx.executor.run_unchecked_with_env(
            manager.binary(),
            manager.update_args(),
            manager.install_env(),
        )?;
        let ok = result.success
            || result
                .code
                .is_some_and(|code| manager.update_ok_codes().contains(&code));
        if ok {
            return Ok(());
        }
        last_detail = result.stderr.trim().to_string();
        if attempt < CACHE_UPDATE_ATTEMPTS {
            ctx.log.warn(&format!(
                "Cache refresh failed (attempt {attempt}/{CACHE_UPDATE_ATTEMPTS}), retrying"
            ));
            std::thread::sleep(retry_delay);
        }
    }
    anyhow::bail!("package cache refresh failed: {last_detail}")
}

/// Install the whole batch at once; on failure fall back to per-package
/// installs so one bad name does not sink the rest.
fn install_packages(
    ctx: &Context,
    manager: PackageManager,
    packages: &[String],
) -> anyhow::Result<()> {
    ctx.log
        .info(&format!("Installing {} packages", packages.len()));

    let refs: Vec<&str> = packages.iter().map(String::as_str).collect();
    let mut args: Vec<&str> = manager.install_args().to_vec();
    args.extend(&refs);

    let batch = ctx
        .executor
        .run_unchecked_with_env(manager.binary(), &args, manager.install_env())?;
    if batch.success {
        return Ok(());
    }

    ctx.log
        .warn("Batch install failed, retrying packages individually");
    for package in packages {
        if is_installed(ctx.executor.as_ref(), manager, package) {
            continue;
        }
        let mut single: Vec<&str> = manager.install_args().to_vec();
        single.push(package);
        let result =
            ctx.executor
                .run_unchecked_with_env(manager.binary(), &single, manager.install_env())?;
        if !result.success {
            // Non-fatal: some packages are distribution-optional. A package
            // the platform genuinely needs will fail the command check below.
            ctx.log.warn(
                &InstallError::DependencyInstall {
                    package: package.clone(),
                    detail: result.stderr.trim().to_string(),
                }
                .to_string(),
            );
        }
    }
    Ok(())
}

fn is_installed(executor: &dyn Executor, manager: PackageManager, package: &str) -> bool {
    let (program, args) = manager.query_command(package);
    executor
        .run_unchecked(program, &args)
        .is_ok_and(|r| r.success)
}

/// Warning-only check for hardware virtualization; guests still run
/// without acceleration.
fn check_kvm_support(ctx: &Context) -> anyhow::Result<()> {
    check_kvm_support_at(ctx, Path::new("/dev/kvm"))
}

fn check_kvm_support_at(ctx: &Context, device: &Path) -> anyhow::Result<()> {
    ctx.log.info("Checking KVM virtualization support");

    if ctx.executor.which("kvm-ok") {
        let result = ctx.executor.run_unchecked("kvm-ok", &[])?;
        if result.success && result.stdout.contains("KVM acceleration can be used") {
            ctx.log.debug("kvm-ok reports acceleration available");
            return Ok(());
        }
    }

    if device.exists() {
        let device_str = device.display().to_string();
        let access = ctx
            .executor
            .run_unchecked("test", &["-r", &device_str, "-a", "-w", &device_str])?;
        if !access.success {
            ctx.log.warn(&format!(
                "{device_str} exists but is not accessible; add the service user to the kvm group"
            ));
        }
        return Ok(());
    }

    ctx.log.warn(
        "KVM acceleration is unavailable; virtual machines will run without \
         hardware acceleration. Enable VT-x/AMD-V in firmware and reboot.",
    );
    Ok(())
}

fn verify_required_commands(ctx: &Context) -> anyhow::Result<()> {
    let missing: Vec<&str> = REQUIRED_COMMANDS
        .iter()
        .copied()
        .filter(|cmd| !ctx.executor.which(cmd))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!(
            "required commands still missing after install: {}",
            missing.join(", ")
        )
    }
}

/// Debian-family packages initialize the cluster on install; RHEL, SUSE
/// and Arch leave an empty data directory behind.
fn initialize_postgres_cluster(ctx: &Context) -> anyhow::Result<()> {
    match ctx.profile.os_family {
        OsFamily::Debian => Ok(()),
        OsFamily::Rhel | OsFamily::Suse => {
            if Path::new("/var/lib/pgsql/data/PG_VERSION").exists() {
                ctx.log.debug("postgres cluster already initialized");
                return Ok(());
            }
            ctx.log.info("Initializing postgres cluster");
            let result = ctx
                .executor
                .run_unchecked("postgresql-setup", &["--initdb"])?;
            // Re-runs report "not empty"; treat that as already done.
            if result.success || result.stderr.contains("not empty") {
                Ok(())
            } else {
                anyhow::bail!("postgresql-setup failed: {}", result.stderr.trim())
            }
        }
        OsFamily::Arch => {
            if Path::new("/var/lib/postgres/data/PG_VERSION").exists() {
                ctx.log.debug("postgres cluster already initialized");
                return Ok(());
            }
            ctx.log.info("Initializing postgres cluster");
            ctx.executor.run(
                "sudo",
                &[
                    "-u",
                    "postgres",
                    "initdb",
                    "-D",
                    "/var/lib/postgres/data",
                ],
            )?;
            Ok(())
        }
    }
}

/// Poll until the local postgres accepts superuser connections.
fn wait_for_postgres(ctx: &Context) -> anyhow::Result<()> {
    let probe = ReadinessProbe::new("postgresql", 10, Duration::from_secs(3));
    let executor = Arc::clone(&ctx.executor);
    probe.wait_ready(move || {
        match executor.run_unchecked("sudo", &["-u", "postgres", "psql", "-c", "SELECT 1"]) {
            Ok(result) if result.success => ProbeObservation::ready(),
            Ok(result) => ProbeObservation::not_ready(result.stderr.trim().to_string()),
            Err(error) => ProbeObservation::not_ready(error.to_string()),
        }
    })?;
    ctx.log.info("postgres is accepting connections");
    Ok(())
}
