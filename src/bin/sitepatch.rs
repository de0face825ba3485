// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use sitepatch::{
    config::SiteConfig,
    patch::{ApplyOptions, ApplyReport, PatchManager, RollbackOutcome},
    path::default_config_path,
    prompt::{Confirmation, InquirePrompt, Policy},
    remote::SshConnector,
};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "sitepatch [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Site configuration file to use.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => default_config_path()?,
        };
        let config = SiteConfig::load(&path)?;
        let prompt: &dyn Confirmation = if self.yes {
            &Policy::AlwaysYes
        } else {
            &InquirePrompt
        };
        let mut manager =
            PatchManager::new(&config, SshConnector::new(&config.remote.host), prompt)?;

        match self.command {
            Command::Add(opts) => {
                manager.add(relative(&opts.path), opts.description.as_deref())?;
            }
            Command::Remove(opts) => {
                for path in &opts.paths {
                    manager.remove(relative(path))?;
                }
            }
            Command::Apply(opts) => run_apply(&mut manager, opts)?,
            Command::Rollback(opts) => {
                match manager.rollback(relative(&opts.path), opts.dry_run)? {
                    RollbackOutcome::Restored { backup } => info!("restored from {backup}"),
                    RollbackOutcome::DryRun => info!("rollback simulated"),
                }
            }
            Command::List(opts) => run_list(&manager, opts)?,
            Command::Info => run_info(&manager),
            Command::Exclusions => {
                for path in manager.sync_exclusions() {
                    println!("{path}");
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Register local modification of a file as a patch.
    #[command(override_usage = "sitepatch add [options] <path>")]
    Add(AddOptions),

    /// Deregister patches without touching the remote target.
    #[command(override_usage = "sitepatch remove [options] <path>...")]
    Remove(RemoveOptions),

    /// Apply one patch, or every registered patch.
    #[command(override_usage = "sitepatch apply [options] [<path>]")]
    Apply(ApplyCommandOptions),

    /// Restore remote file from the backup of the last apply.
    #[command(override_usage = "sitepatch rollback [options] <path>")]
    Rollback(RollbackOptions),

    /// List registered patches with their status.
    #[command(override_usage = "sitepatch list [options] [<pattern>]...")]
    List(ListOptions),

    /// Show lock store information.
    #[command(override_usage = "sitepatch info")]
    Info,

    /// Print paths a whole-tree sync must leave alone.
    #[command(override_usage = "sitepatch exclusions")]
    Exclusions,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct AddOptions {
    /// Path of patched file relative to the site root.
    #[arg(required = true, value_name = "path")]
    pub path: String,

    /// Brief description of the patch.
    #[arg(short, long, value_name = "summary")]
    pub description: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Paths of patched files relative to the site root.
    #[arg(required = true, value_name = "path")]
    pub paths: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ApplyCommandOptions {
    /// Path of patched file relative to the site root.
    #[arg(value_name = "path")]
    pub path: Option<String>,

    /// Show what would be done without touching the remote target.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Overwrite drifted remote files and accept drifted local files.
    #[arg(short, long)]
    pub force: bool,

    /// Simulate instead of failing on a protected target.
    #[arg(short, long)]
    pub simulate_if_protected: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RollbackOptions {
    /// Path of patched file relative to the site root.
    #[arg(required = true, value_name = "path")]
    pub path: String,

    /// Show what would be done without touching the remote target.
    #[arg(short = 'n', long)]
    pub dry_run: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// Glob patterns that listed paths must match.
    #[arg(value_name = "pattern")]
    pub patterns: Vec<String>,

    /// Show versions and dates.
    #[arg(short, long)]
    pub verbose: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

// INVARIANT: Engine works with paths relative to the site root.
fn relative(path: &str) -> &str {
    path.trim_start_matches('/')
}

fn run_apply(
    manager: &mut PatchManager<'_, SshConnector, &dyn Confirmation>,
    opts: ApplyCommandOptions,
) -> Result<()> {
    let options = ApplyOptions {
        dry_run: opts.dry_run,
        force: opts.force,
        simulate_if_protected: opts.simulate_if_protected,
    };

    let report = manager.apply(opts.path.as_deref().map(relative), options)?;
    if let ApplyReport::Batch(batch) = &report {
        for entry in &batch.entries {
            info!("{}: {}", entry.path, entry.result);
        }
    }

    if !report.is_success() {
        return Err(anyhow!("not every patch could be applied"));
    }

    Ok(())
}

fn run_list(
    manager: &PatchManager<'_, SshConnector, &dyn Confirmation>,
    opts: ListOptions,
) -> Result<()> {
    let listing = manager.list(&opts.patterns)?;
    if listing.is_empty() {
        warn!("no registered patches match");
        return Ok(());
    }

    for entry in listing {
        let owner = if entry.component.is_versioned() {
            format!("{} {}", entry.component.kind, entry.component.slug)
        } else {
            "file".to_string()
        };
        println!("{}", entry.path);
        println!("    {owner}: {}", entry.record.description);
        println!("    status: {}", entry.state);

        if opts.verbose {
            let unknown = || "unknown".to_string();
            println!(
                "    local version: {}",
                entry.record.local_version.clone().unwrap_or_else(unknown)
            );
            println!(
                "    remote version: {}",
                entry.record.remote_version.clone().unwrap_or_else(unknown)
            );
            if let Some(date) = entry.record.applied_date {
                println!("    applied: {}", date.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(backup) = &entry.record.backup_file {
                println!("    backup: {backup}");
            }
        }
    }

    Ok(())
}

fn run_info(manager: &PatchManager<'_, SshConnector, &dyn Confirmation>) {
    let info = manager.info();
    println!("site: {}", info.site.as_deref().unwrap_or("<generic>"));
    println!("remote: {}", info.remote);
    println!("local: {}", info.local.display());
    println!(
        "production safety: {}",
        if info.production_safety { "enabled" } else { "disabled" }
    );
    println!(
        "lock file: {}{}",
        info.lock_file.display(),
        if info.exists { "" } else { " (not created yet)" }
    );
    if info.fallback {
        println!("    read from generic lock file until first save");
    }
    println!("patches: {} registered, {} applied", info.patches, info.applied);
    if let Some(updated) = info.last_updated {
        println!("last updated: {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
}
