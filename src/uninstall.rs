//! Granular removal of an installed platform.
//!
//! The default scope only stops and disables the platform's services.
//! File removal and database removal are separate opt-ins so an operator
//! can tear down the runtime while keeping data, or wipe everything.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::APP_NAME;
use crate::exec::Executor;
use crate::logging::Log;
use crate::services::ServiceManager;
use crate::unit::UNIT_DIR;

/// What the uninstall run is allowed to touch.
#[derive(Debug, Clone)]
pub struct UninstallScope {
    /// Remove unit files and the install directory.
    pub remove_files: bool,
    /// Drop the application database and role.
    pub remove_database: bool,
    pub install_dir: PathBuf,
    pub db_user: String,
    pub db_name: String,
}

impl Default for UninstallScope {
    fn default() -> Self {
        Self {
            remove_files: false,
            remove_database: false,
            install_dir: PathBuf::from("/opt").join(APP_NAME),
            db_user: APP_NAME.to_string(),
            db_name: APP_NAME.to_string(),
        }
    }
}

/// Services owned by this product, in shutdown order (frontend first so
/// the backend is never yanked out from under it).
const OWNED_UNITS: &[&str] = &["platform-frontend", "platform-backend"];

pub struct Uninstaller {
    executor: Arc<dyn Executor>,
    log: Arc<dyn Log>,
    scope: UninstallScope,
    dry_run: bool,
}

impl Uninstaller {
    #[must_use]
    pub const fn new(
        executor: Arc<dyn Executor>,
        log: Arc<dyn Log>,
        scope: UninstallScope,
        dry_run: bool,
    ) -> Self {
        Self {
            executor,
            log,
            scope,
            dry_run,
        }
    }

    /// Execute the uninstall within the configured scope.
    ///
    /// # Errors
    ///
    /// Fails when a service cannot be stopped, a file cannot be removed,
    /// or a database object cannot be dropped. Missing targets are not
    /// errors; re-running an uninstall converges.
    pub fn run(&self) -> anyhow::Result<()> {
        self.stop_services()?;
        if self.scope.remove_files {
            self.remove_files()?;
        } else {
            self.log
                .info("Keeping installed files (pass --remove-files to delete)");
        }
        if self.scope.remove_database {
            self.remove_database()?;
        } else {
            self.log
                .info("Keeping the database (pass --remove-database to drop)");
        }
        Ok(())
    }

    fn stop_services(&self) -> anyhow::Result<()> {
        self.log.stage("Stopping services");
        let services = ServiceManager::new(self.executor.clone(), self.log.clone(), self.dry_run);
        for unit in OWNED_UNITS {
            services.stop_and_disable(unit)?;
        }
        Ok(())
    }

    fn remove_files(&self) -> anyhow::Result<()> {
        self.log.stage("Removing files");

        for unit in OWNED_UNITS {
            let path = PathBuf::from(UNIT_DIR).join(format!("{unit}.service"));
            if self.dry_run {
                self.log.dry_run(&format!("Would remove {}", path.display()));
                continue;
            }
            if path.exists() {
                self.log.info(&format!("Removing {}", path.display()));
                std::fs::remove_file(&path)?;
            }
        }

        if !self.dry_run {
            let services =
                ServiceManager::new(self.executor.clone(), self.log.clone(), self.dry_run);
            services.daemon_reload()?;
        }

        let dir = &self.scope.install_dir;
        if self.dry_run {
            self.log
                .dry_run(&format!("Would remove directory {}", dir.display()));
            return Ok(());
        }
        if dir.is_dir() {
            self.log.info(&format!("Removing {}", dir.display()));
            std::fs::remove_dir_all(dir)?;
        } else {
            self.log
                .debug(&format!("{} not present, skipping", dir.display()));
        }
        Ok(())
    }

    fn remove_database(&self) -> anyhow::Result<()> {
        self.log.stage("Removing database");
        if self.dry_run {
            self.log.dry_run(&format!(
                "Would drop database {} and role {}",
                self.scope.db_name, self.scope.db_user
            ));
            return Ok(());
        }

        // Database first; the role cannot be dropped while it owns it.
        let drop_db = format!("DROP DATABASE IF EXISTS \"{}\"", self.scope.db_name);
        let result = self
            .executor
            .run_unchecked("sudo", &["-u", "postgres", "psql", "-c", &drop_db])?;
        if !result.success {
            anyhow::bail!(
                "failed to drop database {}: {}",
                self.scope.db_name,
                result.stderr.trim()
            );
        }

        let drop_role = format!("DROP USER IF EXISTS \"{}\"", self.scope.db_user);
        let result = self
            .executor
            .run_unchecked("sudo", &["-u", "postgres", "psql", "-c", &drop_role])?;
        if !result.success {
            anyhow::bail!(
                "failed to drop role {}: {}",
                self.scope.db_user,
                result.stderr.trim()
            );
        }
        self.log.info("Database and role removed");
        Ok(())
    }
}
