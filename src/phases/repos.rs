//! Phase 4: application component checkout and build.

use std::path::Path;

use crate::context::Context;
use crate::phases::{Phase, PhaseOutcome};

/// One deployable component of the platform.
#[derive(Debug, Clone, Copy)]
struct Component {
    /// Directory name under the install root and repository name under the
    /// repo base.
    name: &'static str,
    /// Whether the component is a Node project (`npm install` + build).
    node_build: bool,
    /// Whether the component is a Rust project (`cargo build --release`).
    cargo_build: bool,
}

const COMPONENTS: &[Component] = &[
    Component {
        name: "backend",
        node_build: true,
        cargo_build: false,
    },
    Component {
        name: "frontend",
        node_build: true,
        cargo_build: false,
    },
    Component {
        name: "agent",
        node_build: false,
        cargo_build: true,
    },
];

/// Clones or updates each component checkout and runs its build.
pub struct RepoCheckout;

impl Phase for RepoCheckout {
    fn name(&self) -> &'static str {
        "Repositories"
    }

    fn run(&self, ctx: &Context) -> anyhow::Result<PhaseOutcome> {
        if ctx.dry_run {
            for component in COMPONENTS {
                ctx.log.dry_run(&format!(
                    "Would clone or update {} into {}",
                    source_url(ctx, component.name),
                    ctx.settings.install_dir.join(component.name).display()
                ));
            }
            return Ok(PhaseOutcome::DryRun);
        }

        std::fs::create_dir_all(&ctx.settings.install_dir)?;

        for component in COMPONENTS {
            let target = ctx.settings.install_dir.join(component.name);
            sync_checkout(ctx, component.name, &target)?;
            if component.node_build {
                build_node(ctx, component.name, &target)?;
            }
            if component.cargo_build {
                build_cargo(ctx, component.name, &target)?;
            }
        }
        Ok(PhaseOutcome::Ok)
    }
}

/// Remote URL, or the path of a local mirror when one was provided.
fn source_url(ctx: &Context, name: &str) -> String {
    ctx.settings.local_repo.as_ref().map_or_else(
        || format!("{}/{name}.git", ctx.settings.repo_base.trim_end_matches('/')),
        |base| base.join(name).display().to_string(),
    )
}

/// Clone the repository, or fast-forward an existing checkout in place.
fn sync_checkout(ctx: &Context, name: &str, target: &Path) -> anyhow::Result<()> {
    if target.join(".git").is_dir() {
        ctx.log.info(&format!("Updating {name}"));
        let target_str = path_str(target);
        let result =
            ctx.executor
                .run_unchecked("git", &["-C", &target_str, "pull", "--ff-only"])?;
        if !result.success {
            // Diverged local checkout; leave it alone rather than clobber
            // operator changes.
            ctx.log.warn(&format!(
                "{name} checkout could not be fast-forwarded: {}",
                result.stderr.trim()
            ));
        }
        return Ok(());
    }

    let url = source_url(ctx, name);
    ctx.log.info(&format!("Cloning {url}"));
    ctx.executor
        .run("git", &["clone", "--depth", "1", &url, &path_str(target)])?;
    Ok(())
}

fn build_node(ctx: &Context, name: &str, dir: &Path) -> anyhow::Result<()> {
    ctx.log.info(&format!("Installing {name} dependencies"));
    ctx.executor.run_in(dir, "npm", &["install"])?;
    ctx.log.info(&format!("Building {name}"));
    ctx.executor.run_in(dir, "npm", &["run", "build"])?;
    Ok(())
}

fn build_cargo(ctx: &Context, name: &str, dir: &Path) -> anyhow::Result<()> {
    if !ctx.executor.which("cargo") {
        ctx.log
            .warn(&format!("cargo not found, skipping {name} build"));
        return Ok(());
    }
    ctx.log.info(&format!("Building {name} (release)"));
    ctx.executor.run_in(dir, "cargo", &["build", "--release"])?;
    Ok(())
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}
