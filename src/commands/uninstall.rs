//! The `uninstall` subcommand.

use std::io::{BufRead as _, Write as _};
use std::sync::Arc;

use anyhow::Result;

use crate::cli::{GlobalOpts, UninstallOpts};
use crate::exec::SystemExecutor;
use crate::logging::{Log, Logger};
use crate::uninstall::{UninstallScope, Uninstaller};

/// Run an uninstall within the scope the flags select.
///
/// # Errors
///
/// Fails when the confirmation prompt cannot be read or the uninstaller
/// hits an unremovable target.
pub fn run(global: &GlobalOpts, opts: &UninstallOpts, log: &Arc<Logger>) -> Result<()> {
    let scope = UninstallScope {
        remove_files: opts.remove_files,
        remove_database: opts.remove_database,
        install_dir: opts.install_dir.clone(),
        db_user: opts.db_user.clone(),
        db_name: opts.db_name.clone(),
    };

    log.stage("Uninstall");
    describe_scope(log.as_ref(), &scope, global.dry_run);

    if !global.dry_run && !opts.yes && !confirm("Proceed with uninstall? [y/N] ")? {
        log.info("Aborted");
        return Ok(());
    }

    let log_handle: Arc<dyn Log> = log.clone();
    Uninstaller::new(Arc::new(SystemExecutor), log_handle, scope, global.dry_run).run()
}

fn describe_scope(log: &Logger, scope: &UninstallScope, dry_run: bool) {
    log.info("This will stop and disable the platform services");
    if scope.remove_files {
        log.info(&format!(
            "It will delete unit files and {}",
            scope.install_dir.display()
        ));
    }
    if scope.remove_database {
        log.info(&format!(
            "It will drop database {} and role {}",
            scope.db_name, scope.db_user
        ));
    }
    if dry_run {
        log.dry_run("No changes will be applied");
    }
}

/// Prompt on stdout and read a single confirmation line.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
