//! Phase 3: database role, database, and postgres configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config_file::{self, ConfigPatch, MatchPolicy};
use crate::context::Context;
use crate::error::InstallError;
use crate::exec::Executor;
use crate::phases::{Phase, PhaseOutcome};
use crate::platform::OsFamily;
use crate::services::{ProbeObservation, ReadinessProbe, ServiceManager};

const SUPERUSER_ATTEMPTS: u32 = 3;
const SUPERUSER_DELAY: Duration = Duration::from_secs(3);

/// Leading tokens of `pg_hba.conf` rule lines. The file resolves first
/// match wins, so new rules must precede the existing catch-alls.
const HBA_RULE_TOKENS: &[&str] = &["local", "host", "hostssl", "hostnossl"];

/// Creates the application role and database idempotently and switches
/// `pg_hba.conf` to password authentication for them.
pub struct DatabaseSetup;

impl Phase for DatabaseSetup {
    fn name(&self) -> &'static str {
        "Database Setup"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome> {
        if ctx.dry_run {
            ctx.log.dry_run(&format!(
                "Would create role {} and database {} (owner {})",
                ctx.settings.db_user, ctx.settings.db_name, ctx.settings.db_user
            ));
            ctx.log
                .dry_run("Would enable password authentication in pg_hba.conf");
            return Ok(PhaseOutcome::DryRun);
        }

        verify_superuser_access(ctx)?;
        ensure_role(ctx)?;
        ensure_database(ctx)?;
        configure_authentication(ctx)?;
        test_application_connection(ctx)?;
        verify_permissions(ctx)?;
        Ok(PhaseOutcome::Ok)
    }
}

/// Run a statement as the postgres superuser via local peer auth.
fn psql_super(executor: &dyn Executor, sql: &str) -> anyhow::Result<crate::exec::ExecResult> {
    executor.run_unchecked("sudo", &["-u", "postgres", "psql", "-tAc", sql])
}

/// Confirm local superuser access works, retrying while postgres settles.
fn verify_superuser_access(ctx: &Context) -> anyhow::Result<()> {
    verify_superuser_access_with(ctx, SUPERUSER_DELAY)
}

fn verify_superuser_access_with(ctx: &Context, retry_delay: Duration) -> anyhow::Result<()> {
    let mut last_detail = String::new();
    for attempt in 1..=SUPERUSER_ATTEMPTS {
        let result = psql_super(ctx.executor.as_ref(), "SELECT 1")?;
        if result.success {
            return Ok(());
        }
        last_detail = result.stderr.trim().to_string();
        if attempt < SUPERUSER_ATTEMPTS {
            ctx.log.debug(&format!(
                "superuser probe failed (attempt {attempt}/{SUPERUSER_ATTEMPTS})"
            ));
            std::thread::sleep(retry_delay);
        }
    }
    Err(InstallError::AuthenticationRequired { detail: last_detail }.into())
}

fn role_exists(ctx: &Context) -> anyhow::Result<bool> {
    let sql = format!(
        "SELECT 1 FROM pg_roles WHERE rolname = '{}'",
        sql_escape(&ctx.settings.db_user)
    );
    let result = psql_super(ctx.executor.as_ref(), &sql)?;
    Ok(result.success && result.stdout.trim() == "1")
}

fn database_exists(ctx: &Context) -> anyhow::Result<bool> {
    let sql = format!(
        "SELECT 1 FROM pg_database WHERE datname = '{}'",
        sql_escape(&ctx.settings.db_name)
    );
    let result = psql_super(ctx.executor.as_ref(), &sql)?;
    Ok(result.success && result.stdout.trim() == "1")
}

/// Create the application role, or realign its password when it already
/// exists.
fn ensure_role(ctx: &Context) -> anyhow::Result<()> {
    let user = &ctx.settings.db_user;
    let password = sql_escape(&ctx.settings.db_password);
    let sql = if role_exists(ctx)? {
        ctx.log.info(&format!("Role {user} exists, updating password"));
        format!("ALTER USER \"{user}\" WITH PASSWORD '{password}'")
    } else {
        ctx.log.info(&format!("Creating role {user}"));
        format!(
            "CREATE USER \"{user}\" WITH PASSWORD '{password}' CREATEDB NOSUPERUSER INHERIT NOCREATEROLE"
        )
    };
    let result = psql_super(ctx.executor.as_ref(), &sql)?;
    if result.success {
        Ok(())
    } else {
        anyhow::bail!("role setup failed: {}", result.stderr.trim())
    }
}

/// Create the application database, or realign its owner.
fn ensure_database(ctx: &Context) -> anyhow::Result<()> {
    let name = &ctx.settings.db_name;
    let user = &ctx.settings.db_user;
    let sql = if database_exists(ctx)? {
        ctx.log
            .info(&format!("Database {name} exists, ensuring owner {user}"));
        format!("ALTER DATABASE \"{name}\" OWNER TO \"{user}\"")
    } else {
        ctx.log.info(&format!("Creating database {name}"));
        format!("CREATE DATABASE \"{name}\" OWNER \"{user}\"")
    };
    let result = psql_super(ctx.executor.as_ref(), &sql)?;
    if result.success {
        Ok(())
    } else {
        anyhow::bail!("database setup failed: {}", result.stderr.trim())
    }
}

/// Locate `pg_hba.conf`: ask the running server first, then fall back to
/// the family's conventional locations.
fn discover_hba_path(ctx: &Context) -> anyhow::Result<PathBuf> {
    let result = psql_super(ctx.executor.as_ref(), "SHOW hba_file")?;
    if result.success {
        let reported = result.stdout.trim();
        if !reported.is_empty() && Path::new(reported).is_file() {
            return Ok(PathBuf::from(reported));
        }
    }

    let fallbacks: Vec<PathBuf> = match ctx.profile.os_family {
        OsFamily::Debian => debian_hba_candidates(),
        OsFamily::Rhel | OsFamily::Suse => vec![PathBuf::from("/var/lib/pgsql/data/pg_hba.conf")],
        OsFamily::Arch => vec![PathBuf::from("/var/lib/postgres/data/pg_hba.conf")],
    };
    fallbacks
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| anyhow::anyhow!("pg_hba.conf not found"))
}

/// Debian keeps per-version config under /etc/postgresql/<ver>/main.
fn debian_hba_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(entries) = std::fs::read_dir("/etc/postgresql") {
        for entry in entries.flatten() {
            candidates.push(entry.path().join("main/pg_hba.conf"));
        }
    }
    candidates.sort();
    candidates.reverse();
    candidates
}

/// Switch local and host access for the application role to password
/// authentication and make postgres listen beyond localhost.
fn configure_authentication(ctx: &Context) -> anyhow::Result<()> {
    let hba = discover_hba_path(ctx)?;
    ctx.log
        .debug(&format!("pg_hba.conf at {}", hba.display()));

    let user = &ctx.settings.db_user;
    let changed = config_file::upsert(&hba, &[
        ConfigPatch::new(
            format!("local   all             {user}"),
            "md5",
            MatchPolicy::SpaceSeparated,
        )
        .inserted_before(HBA_RULE_TOKENS),
        ConfigPatch::new(
            format!("host    all             {user}"),
            "127.0.0.1/32            md5",
            MatchPolicy::SpaceSeparated,
        )
        .inserted_before(HBA_RULE_TOKENS),
    ])?;

    let conf = hba.with_file_name("postgresql.conf");
    let mut restart_needed = changed;
    if conf.is_file() {
        restart_needed |= config_file::upsert(&conf, &[ConfigPatch::new(
            "listen_addresses",
            "'*'",
            MatchPolicy::EqualsSeparated,
        )])?;
    }

    ctx.set_hba_path(hba);

    if restart_needed {
        let services = ServiceManager::new(ctx.executor.clone(), ctx.log.clone(), ctx.dry_run);
        services.restart_to_apply(&crate::resolve::service_name(
            "postgresql",
            ctx.profile.os_family,
        ))?;
    }
    Ok(())
}

/// Connect as the application role with the configured password.
fn test_application_connection(ctx: &Context) -> anyhow::Result<()> {
    let probe = ReadinessProbe::new("postgresql auth", 5, Duration::from_secs(2));
    let executor = Arc::clone(&ctx.executor);
    let settings = ctx.settings.clone();
    let port = settings.db_port.to_string();
    probe.wait_ready(move || {
        let result = executor.run_unchecked_with_env(
            "psql",
            &[
                "-h",
                &settings.db_host,
                "-p",
                &port,
                "-U",
                &settings.db_user,
                "-d",
                &settings.db_name,
                "-tAc",
                "SELECT 1",
            ],
            &[("PGPASSWORD", &settings.db_password)],
        );
        match result {
            Ok(r) if r.success => ProbeObservation::ready(),
            Ok(r) => ProbeObservation::not_ready(r.stderr.trim().to_string()),
            Err(error) => ProbeObservation::not_ready(error.to_string()),
        }
    })?;
    ctx.log.info("Application role can connect with password auth");
    Ok(())
}

/// Prove the role can create objects in its database.
fn verify_permissions(ctx: &Context) -> anyhow::Result<()> {
    let sql = "CREATE TEMP TABLE permission_probe (id int); DROP TABLE permission_probe;";
    let result = ctx.executor.run_unchecked_with_env(
        "psql",
        &[
            "-h",
            &ctx.settings.db_host,
            "-U",
            &ctx.settings.db_user,
            "-d",
            &ctx.settings.db_name,
            "-tAc",
            sql,
        ],
        &[("PGPASSWORD", &ctx.settings.db_password)],
    )?;
    if result.success {
        Ok(())
    } else {
        anyhow::bail!(
            "role {} cannot create tables in {}: {}",
            ctx.settings.db_user,
            ctx.settings.db_name,
            result.stderr.trim()
        )
    }
}

/// Double single quotes for safe embedding in a SQL string literal.
fn sql_escape(input: &str) -> String {
    input.replace('\'', "''")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_helpers::make_test_context;
    use crate::exec::test_helpers::{MockExecutor, RecordingExecutor};
    use crate::platform::OsFamily;

    #[test]
    fn dry_run_issues_no_commands() {
        let executor = Arc::new(RecordingExecutor::new());
        let ctx = make_test_context(OsFamily::Debian, executor.clone(), true);
        assert_eq!(DatabaseSetup.run(&ctx).unwrap(), PhaseOutcome::DryRun);
        assert!(executor.recorded_calls().is_empty());
    }

    #[test]
    fn existing_role_gets_password_update() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            // role_exists probe
            (true, "1".to_string()),
            // ALTER USER
            (true, String::new()),
        ]));
        let ctx = make_test_context(OsFamily::Debian, executor.clone(), false);
        ensure_role(&ctx).unwrap();
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn missing_role_is_created() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            // role_exists probe: no row
            (true, String::new()),
            // CREATE USER
            (true, String::new()),
        ]));
        let ctx = make_test_context(OsFamily::Debian, executor, false);
        ensure_role(&ctx).unwrap();
    }

    #[test]
    fn existing_database_realigns_owner() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (true, "1".to_string()),
            (true, String::new()),
        ]));
        let ctx = make_test_context(OsFamily::Debian, executor, false);
        ensure_database(&ctx).unwrap();
    }

    #[test]
    fn superuser_probe_failure_maps_to_auth_error() {
        let executor = Arc::new(MockExecutor::with_responses(vec![
            (false, String::new()),
            (false, String::new()),
            (false, String::new()),
        ]));
        let mut ctx = make_test_context(OsFamily::Debian, executor, false);
        ctx.settings.db_user = "platform".to_string();
        let err = verify_superuser_access_with(&ctx, Duration::ZERO).unwrap_err();
        let install = err.downcast_ref::<InstallError>().unwrap();
        assert!(matches!(
            install,
            InstallError::AuthenticationRequired { .. }
        ));
    }

    #[test]
    fn auth_rules_are_inserted_before_existing_catch_alls() {
        let dir = tempfile::tempdir().unwrap();
        let hba = dir.path().join("pg_hba.conf");
        std::fs::write(
            &hba,
            "# TYPE  DATABASE        USER            ADDRESS                 METHOD\n\
             local   all             all                                     peer\n\
             host    all             all             127.0.0.1/32            scram-sha-256\n",
        )
        .unwrap();

        let executor = Arc::new(MockExecutor::with_responses(vec![
            // SHOW hba_file
            (true, hba.display().to_string()),
            // systemctl restart postgresql
            (true, String::new()),
        ]));
        let ctx = make_test_context(OsFamily::Debian, executor, false);
        configure_authentication(&ctx).unwrap();

        let content = std::fs::read_to_string(&hba).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        let local_rule = lines
            .iter()
            .position(|l| l.starts_with("local") && l.contains("platform"))
            .unwrap();
        let host_rule = lines
            .iter()
            .position(|l| l.starts_with("host") && l.contains("platform"))
            .unwrap();
        let peer_catch_all = lines.iter().position(|l| l.ends_with("peer")).unwrap();
        assert!(local_rule < peer_catch_all);
        assert!(host_rule < peer_catch_all);
        assert_eq!(ctx.hba_path(), Some(&hba));
    }

    #[test]
    fn sql_escape_doubles_quotes() {
        assert_eq!(sql_escape("o'brien"), "o''brien");
        assert_eq!(sql_escape("plain"), "plain");
    }
}
