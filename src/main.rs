use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use provision_cli::{cli, commands, logging};

fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init_subscriber(args.verbose);
    let log = Arc::new(logging::Logger::new());

    // Conventional exit code for SIGINT so wrapping scripts can tell an
    // interrupt from a failure.
    ctrlc::set_handler(|| {
        eprintln!();
        eprintln!("Interrupted");
        std::process::exit(130);
    })?;

    match args.command {
        cli::Command::Install(opts) => commands::install::run(&args.global, &opts, &log, args.verbose),
        cli::Command::Uninstall(opts) => commands::uninstall::run(&args.global, &opts, &log),
        cli::Command::Version => {
            println!("provision {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
