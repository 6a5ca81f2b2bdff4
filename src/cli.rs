use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the provisioning engine.
#[derive(Parser, Debug)]
#[command(
    name = "provision",
    about = "Cross-distribution provisioning engine for the platform stack",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone)]
pub struct GlobalOpts {
    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install and configure the full platform stack
    Install(Box<InstallOpts>),
    /// Remove installed services, files, and optionally the database
    Uninstall(UninstallOpts),
    /// Print version information
    Version,
}

/// Options for the `install` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct InstallOpts {
    /// Installation directory
    #[arg(long, default_value = "/opt/platform")]
    pub install_dir: PathBuf,

    /// Runtime data directory
    #[arg(long, default_value = "/var/lib/platform")]
    pub data_dir: PathBuf,

    /// Database host
    #[arg(long, default_value = "127.0.0.1")]
    pub db_host: String,

    /// Database port
    #[arg(long, default_value_t = 5432)]
    pub db_port: u16,

    /// Database role name
    #[arg(long, default_value = "platform")]
    pub db_user: String,

    /// Database name
    #[arg(long, default_value = "platform")]
    pub db_name: String,

    /// Database password (generated when omitted)
    #[arg(long)]
    pub db_password: Option<String>,

    /// Host IP the services are reachable at (detected when omitted)
    #[arg(long)]
    pub host_ip: Option<String>,

    /// Libvirt network name
    #[arg(long, default_value = "default")]
    pub network: String,

    /// Backend API port
    #[arg(long, default_value_t = 4000)]
    pub backend_port: u16,

    /// Frontend web port
    #[arg(long, default_value_t = 3000)]
    pub frontend_port: u16,

    /// Redis password (auth disabled when omitted)
    #[arg(long)]
    pub cache_password: Option<String>,

    /// Base URL the component repositories are cloned from
    #[arg(long, default_value = "https://github.com/infinibay")]
    pub repo_base: String,

    /// Clone components from a local mirror directory instead
    #[arg(long)]
    pub local_repo: Option<PathBuf>,

    /// Skip downloading OS installation images
    #[arg(long)]
    pub skip_isos: bool,
}

/// Options for the `uninstall` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct UninstallOpts {
    /// Installation directory to remove
    #[arg(long, default_value = "/opt/platform")]
    pub install_dir: PathBuf,

    /// Database role to drop
    #[arg(long, default_value = "platform")]
    pub db_user: String,

    /// Database to drop
    #[arg(long, default_value = "platform")]
    pub db_name: String,

    /// Also delete unit files and the installation directory
    #[arg(long)]
    pub remove_files: bool,

    /// Also drop the application database and role
    #[arg(long)]
    pub remove_database: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_install_defaults() {
        let cli = Cli::parse_from(["provision", "install"]);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(opts.install_dir, PathBuf::from("/opt/platform"));
        assert_eq!(opts.db_port, 5432);
        assert_eq!(opts.backend_port, 4000);
        assert_eq!(opts.frontend_port, 3000);
        assert!(opts.db_password.is_none());
        assert!(!opts.skip_isos);
    }

    #[test]
    fn parse_install_overrides() {
        let cli = Cli::parse_from([
            "provision",
            "install",
            "--db-user",
            "svc",
            "--host-ip",
            "10.0.0.9",
            "--skip-isos",
        ]);
        let Command::Install(opts) = cli.command else {
            panic!("expected install");
        };
        assert_eq!(opts.db_user, "svc");
        assert_eq!(opts.host_ip.as_deref(), Some("10.0.0.9"));
        assert!(opts.skip_isos);
    }

    #[test]
    fn parse_global_dry_run() {
        let cli = Cli::parse_from(["provision", "install", "--dry-run"]);
        assert!(cli.global.dry_run);
        let cli = Cli::parse_from(["provision", "-d", "uninstall"]);
        assert!(cli.global.dry_run);
    }

    #[test]
    fn parse_uninstall_scopes() {
        let cli = Cli::parse_from([
            "provision",
            "uninstall",
            "--remove-files",
            "--remove-database",
            "-y",
        ]);
        let Command::Uninstall(opts) = cli.command else {
            panic!("expected uninstall");
        };
        assert!(opts.remove_files);
        assert!(opts.remove_database);
        assert!(opts.yes);
    }

    #[test]
    fn uninstall_defaults_keep_everything() {
        let cli = Cli::parse_from(["provision", "uninstall"]);
        let Command::Uninstall(opts) = cli.command else {
            panic!("expected uninstall");
        };
        assert!(!opts.remove_files);
        assert!(!opts.remove_database);
        assert!(!opts.yes);
    }
}
