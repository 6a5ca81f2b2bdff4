//! Phase 5: environment files, migrations, redis hardening, and the
//! platform's own systemd units.

use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::config_file::{self, ConfigPatch, MatchPolicy};
use crate::error::ConfigFileError;
use crate::context::Context;
use crate::phases::{Phase, PhaseOutcome};
use crate::resolve;
use crate::services::{ProbeObservation, ReadinessProbe, ServiceManager};
use crate::unit::UnitSpec;

/// Writes runtime configuration, applies database migrations, and brings
/// the backend and frontend up under systemd with readiness checks.
pub struct ServiceRollout;

impl Phase for ServiceRollout {
    fn name(&self) -> &'static str {
        "Services"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome> {
        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "Would write {} and {}",
                ctx.backend_dir().join(".env").display(),
                ctx.frontend_dir().join(".env").display()
            ));
            ctx.log.dry_run("Would apply database migrations");
            ctx.log.dry_run("Would run the backend setup script");
            ctx.log.dry_run(
                "Would install platform-backend.service and platform-frontend.service",
            );
            return Ok(PhaseOutcome::DryRun);
        }

        write_backend_env(ctx)?;
        write_frontend_env(ctx)?;
        run_migrations(ctx)?;
        run_backend_setup(ctx)?;
        harden_redis(ctx)?;

        let services = ServiceManager::new(ctx.executor.clone(), ctx.log.clone(), ctx.dry_run);
        for spec in [backend_unit(ctx), frontend_unit(ctx)] {
            ctx.log
                .info(&format!("Installing {}.service", spec.name));
            spec.install()?;
        }
        services.daemon_reload()?;

        for unit in ["platform-backend", "platform-frontend"] {
            services.ensure_running(unit)?;
        }
        wait_for_backend(ctx)?;
        wait_for_frontend(ctx)?;

        print_final_summary(ctx);
        Ok(PhaseOutcome::Ok)
    }
}

/// Backend runtime configuration; contains credentials, so mode 0600.
fn write_backend_env(ctx: &Context) -> anyhow::Result<()> {
    let path = ctx.backend_dir().join(".env");
    ctx.log.info("Writing backend environment");
    upsert_env(&path, &[
        ("DATABASE_URL", ctx.database_url()),
        ("TOKENKEY", ctx.jwt_secret().to_string()),
        ("PORT", ctx.settings.backend_port.to_string()),
        ("APP_HOST", ctx.settings.host_ip.clone()),
        ("NODE_ENV", "production".to_string()),
        (
            "DATA_DIR",
            ctx.settings.data_dir.display().to_string(),
        ),
        (
            "LIBVIRT_NETWORK",
            ctx.settings.network_name.clone(),
        ),
    ])?;
    config_file::apply_mode(&path, 0o600)?;
    Ok(())
}

/// Frontend runtime configuration; only public URLs, world-readable.
fn write_frontend_env(ctx: &Context) -> anyhow::Result<()> {
    let path = ctx.frontend_dir().join(".env");
    ctx.log.info("Writing frontend environment");
    upsert_env(&path, &[
        ("NEXT_PUBLIC_API_URL", ctx.backend_url()),
        ("NEXT_PUBLIC_GRAPHQL_URL", ctx.graphql_url()),
        ("PORT", ctx.settings.frontend_port.to_string()),
    ])?;
    config_file::apply_mode(&path, 0o644)?;
    Ok(())
}

fn upsert_env(path: &Path, entries: &[(&str, String)]) -> anyhow::Result<()> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, "")?;
    }
    let patches: Vec<ConfigPatch> = entries
        .iter()
        .map(|(key, value)| ConfigPatch::new(*key, value.clone(), MatchPolicy::EqualsSeparated))
        .collect();
    config_file::upsert(path, &patches)?;
    Ok(())
}

/// Apply pending schema migrations against the configured database.
fn run_migrations(ctx: &Context) -> anyhow::Result<()> {
    ctx.log.info("Applying database migrations");
    let database_url = ctx.database_url();
    ctx.executor.run_in_with_env(
        &ctx.backend_dir(),
        "npx",
        &["prisma", "migrate", "deploy"],
        &[("DATABASE_URL", &database_url)],
    )?;
    Ok(())
}

/// Run the backend's own setup script. It creates the data directories,
/// downloads OS installation images, and installs the libvirt network
/// filters the backend needs before first start.
fn run_backend_setup(ctx: &Context) -> anyhow::Result<()> {
    ctx.log
        .info("Running backend setup (directories, images, network filters)");
    if ctx.settings.skip_isos {
        ctx.log.info("OS image downloads are disabled for this run");
    }
    let env = setup_env(ctx);
    let env_refs: Vec<(&str, &str)> = env.iter().map(|(key, value)| (*key, value.as_str())).collect();
    ctx.executor
        .run_in_with_env(&ctx.backend_dir(), "npm", &["run", "setup"], &env_refs)
        .context("backend setup failed (check libvirtd and the backend .env)")?;
    Ok(())
}

/// Environment for the setup script; mirrors what the migration step gets,
/// plus the image-download switch.
fn setup_env(ctx: &Context) -> Vec<(&'static str, String)> {
    let mut env = vec![("DATABASE_URL", ctx.database_url())];
    if ctx.settings.skip_isos {
        env.push(("SKIP_ISO_DOWNLOAD", "1".to_string()));
    }
    env
}

/// Bind redis to loopback and apply the optional cache password.
fn harden_redis(ctx: &Context) -> anyhow::Result<()> {
    let Some(primary) = resolve::config_path("redis.conf", ctx.profile.os_family) else {
        return Ok(());
    };
    let candidates = vec![primary, PathBuf::from("/etc/redis.conf")];
    let conf = match config_file::locate("redis.conf", &candidates) {
        Ok(path) => path,
        Err(ConfigFileError::NotFound { .. }) => {
            // Hardening is optional when no config file exists.
            ctx.log.debug("redis config not found, skipping hardening");
            return Ok(());
        }
        Err(other) => return Err(other.into()),
    };

    let mut patches = vec![
        ConfigPatch::new("bind", "127.0.0.1", MatchPolicy::SpaceSeparated),
        ConfigPatch::new("port", "6379", MatchPolicy::SpaceSeparated),
        ConfigPatch::new("supervised", "systemd", MatchPolicy::SpaceSeparated),
    ];
    if let Some(password) = &ctx.settings.cache_password {
        patches.push(ConfigPatch::new(
            "requirepass",
            password.clone(),
            MatchPolicy::SpaceSeparated,
        ));
    }

    let changed = config_file::upsert(&conf, &patches)?;
    if changed {
        let services = ServiceManager::new(ctx.executor.clone(), ctx.log.clone(), ctx.dry_run);
        services.restart_to_apply(&resolve::service_name("redis", ctx.profile.os_family))?;
    }
    Ok(())
}

fn backend_unit(ctx: &Context) -> UnitSpec {
    let postgres = format!(
        "{}.service",
        resolve::service_name("postgresql", ctx.profile.os_family)
    );
    UnitSpec {
        name: "platform-backend".to_string(),
        description: "Platform backend API".to_string(),
        exec_start: "/usr/bin/npm run start:prod".to_string(),
        working_dir: ctx.backend_dir(),
        user: "root".to_string(),
        env: vec![("NODE_ENV".to_string(), "production".to_string())],
        after: vec![postgres.clone()],
        requires: vec![postgres],
    }
}

fn frontend_unit(ctx: &Context) -> UnitSpec {
    UnitSpec {
        name: "platform-frontend".to_string(),
        description: "Platform web frontend".to_string(),
        exec_start: "/usr/bin/npm run start".to_string(),
        working_dir: ctx.frontend_dir(),
        user: "root".to_string(),
        env: vec![("NODE_ENV".to_string(), "production".to_string())],
        after: vec!["platform-backend.service".to_string()],
        requires: Vec::new(),
    }
}

fn wait_for_backend(ctx: &Context) -> anyhow::Result<()> {
    wait_for_port(ctx, "platform-backend", ctx.settings.backend_port)
}

fn wait_for_frontend(ctx: &Context) -> anyhow::Result<()> {
    wait_for_port(ctx, "platform-frontend", ctx.settings.frontend_port)
}

/// TCP-level readiness: the service counts as up once its port accepts.
fn wait_for_port(ctx: &Context, service: &str, port: u16) -> anyhow::Result<()> {
    let probe = ReadinessProbe::new(service, 30, Duration::from_secs(2));
    let address = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    probe.wait_ready(|| {
        match std::net::TcpStream::connect_timeout(&address, Duration::from_secs(1)) {
            Ok(_) => ProbeObservation::ready(),
            Err(error) => ProbeObservation::not_ready(format!("{address}: {error}")),
        }
    })?;
    ctx.log.info(&format!("{service} is listening on port {port}"));
    Ok(())
}

fn print_final_summary(ctx: &Context) {
    ctx.log.stage("Installation complete");
    ctx.log.info(&format!("Frontend:  {}", ctx.frontend_url()));
    ctx.log.info(&format!("Backend:   {}", ctx.backend_url()));
    ctx.log.info(&format!(
        "Database:  {}@{}:{}/{}",
        ctx.settings.db_user,
        ctx.settings.db_host,
        ctx.settings.db_port,
        ctx.settings.db_name
    ));
    ctx.log.info("Next steps:");
    ctx.log.info(&format!(
        "  1. Open {} and create your admin account",
        ctx.frontend_url()
    ));
    ctx.log.info("  2. Configure departments and security policies");
    ctx.log.info("  3. Create your first virtual machine");
    if ctx.settings.skip_isos {
        ctx.log
            .warn("OS image downloads were skipped; download installation images manually");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_helpers::make_test_context;
    use crate::exec::test_helpers::{MockExecutor, RecordingExecutor};
    use crate::logging::RecordingLog;
    use crate::platform::OsFamily;

    fn context_in(dir: &tempfile::TempDir, executor: Arc<dyn crate::exec::Executor>) -> Context {
        let mut ctx = make_test_context(OsFamily::Debian, executor, false);
        ctx.settings.install_dir = dir.path().to_path_buf();
        ctx
    }

    #[test]
    fn dry_run_issues_no_commands() {
        let executor = Arc::new(RecordingExecutor::new());
        let ctx = make_test_context(OsFamily::Debian, executor.clone(), true);
        assert_eq!(ServiceRollout.run(&ctx).unwrap(), PhaseOutcome::DryRun);
        assert!(executor.recorded_calls().is_empty());
    }

    #[test]
    fn backend_env_contains_database_url_and_secret() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        write_backend_env(&ctx).unwrap();

        let content = std::fs::read_to_string(ctx.backend_dir().join(".env")).unwrap();
        assert!(content.contains(&format!("DATABASE_URL={}", ctx.database_url())));
        assert!(content.contains(&format!("TOKENKEY={}", ctx.jwt_secret())));
        assert!(content.contains("PORT=4000"));
        assert!(content.contains("NODE_ENV=production"));
    }

    #[test]
    fn backend_env_is_owner_only() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        write_backend_env(&ctx).unwrap();

        let mode = std::fs::metadata(ctx.backend_dir().join(".env"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn frontend_env_points_at_backend() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        write_frontend_env(&ctx).unwrap();

        let content = std::fs::read_to_string(ctx.frontend_dir().join(".env")).unwrap();
        assert!(content.contains("NEXT_PUBLIC_API_URL=http://192.0.2.10:4000"));
        assert!(content.contains("NEXT_PUBLIC_GRAPHQL_URL=http://192.0.2.10:4000/graphql"));
    }

    #[test]
    fn rewriting_env_preserves_existing_secret() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        write_backend_env(&ctx).unwrap();
        let first = std::fs::read_to_string(ctx.backend_dir().join(".env")).unwrap();
        write_backend_env(&ctx).unwrap();
        let second = std::fs::read_to_string(ctx.backend_dir().join(".env")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn backend_unit_requires_postgres() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        let rendered = backend_unit(&ctx).render();
        assert!(rendered.contains("Requires=postgresql.service"));
        assert!(rendered.contains("Restart=on-failure"));
    }

    #[test]
    fn frontend_unit_starts_after_backend() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        let rendered = frontend_unit(&ctx).render();
        assert!(rendered.contains("After=network.target platform-backend.service"));
        assert!(!rendered.contains("Requires="));
    }

    #[test]
    fn backend_setup_invokes_npm_run_setup() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new());
        let ctx = context_in(&dir, executor.clone());
        run_backend_setup(&ctx).unwrap();

        let calls = executor.recorded_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "npm");
        assert_eq!(calls[0].1, vec!["run", "setup"]);
    }

    #[test]
    fn setup_env_threads_iso_skip_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));

        let env = setup_env(&ctx);
        assert!(env.iter().all(|(key, _)| *key != "SKIP_ISO_DOWNLOAD"));

        ctx.settings.skip_isos = true;
        let env = setup_env(&ctx);
        assert!(env.contains(&("SKIP_ISO_DOWNLOAD", "1".to_string())));
    }

    #[test]
    fn final_summary_notes_skipped_image_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(RecordingLog::new());
        let mut ctx = context_in(&dir, Arc::new(RecordingExecutor::new()));
        ctx.log = log.clone();
        ctx.settings.skip_isos = true;

        print_final_summary(&ctx);
        assert!(log.warnings().iter().any(|w| w.contains("skipped")));
    }

    #[test]
    fn migrations_inherit_database_url() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(MockExecutor::ok(""));
        let ctx = context_in(&dir, executor.clone());
        run_migrations(&ctx).unwrap();
        assert_eq!(executor.call_count(), 1);
    }
}
