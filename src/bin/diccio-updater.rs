// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use diccio_updater::{
    path::default_config_file,
    restart::relaunch_or_exit,
    FileVersionStore, IndicatifProgress, RestartFlag, UpdateOrchestrator, UpdatePrompt,
    UpdateResult, UpdaterConfig, VersionStore,
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::Confirm;
use std::{fs::read_to_string, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "diccio-updater [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to updater configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let config = load_config(self.config)?;
        match self.command {
            Command::Check => run_check(config).await,
            Command::Update(opts) => run_update(config, opts).await,
            Command::Version => run_version(config),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Check if a newer version is published.
    #[command(override_usage = "diccio-updater check [options]")]
    Check,

    /// Download and install the published version.
    #[command(override_usage = "diccio-updater update [options]")]
    Update(UpdateOptions),

    /// Show locally installed version.
    #[command(override_usage = "diccio-updater version [options]")]
    Version,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UpdateOptions {
    /// Install without asking for confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Do not restart after a successful update.
    #[arg(long)]
    pub no_restart: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn load_config(path: Option<PathBuf>) -> Result<UpdaterConfig> {
    let path = match path {
        Some(path) => path,
        None => default_config_file()?,
    };

    if !path.exists() {
        info!("no configuration at {:?}, using defaults", path.display());
        return Ok(UpdaterConfig::default());
    }

    Ok(read_to_string(&path)?.parse()?)
}

async fn run_check(config: UpdaterConfig) -> Result<()> {
    // INVARIANT: Blocking HTTP client must stay off the async runtime.
    let check = tokio::task::spawn_blocking(move || -> Result<_> {
        let orchestrator = UpdateOrchestrator::from_config(&config, RestartFlag::new())?;
        Ok(orchestrator.check()?)
    })
    .await??;

    if check.is_up_to_date() {
        info!("already up to date at version {}", check.remote);
    } else {
        info!(
            "update available: {} -> {}",
            check
                .local
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".into()),
            check.remote
        );
    }

    Ok(())
}

async fn run_update(config: UpdaterConfig, opts: UpdateOptions) -> Result<()> {
    let restart = RestartFlag::new();
    let signal = restart.clone();
    let assume_yes = opts.yes;

    let result = tokio::task::spawn_blocking(move || -> Result<UpdateResult> {
        let mut orchestrator = UpdateOrchestrator::from_config(&config, signal)?;
        let mut progress = IndicatifProgress::new(ProgressBar::new(0));
        let result =
            orchestrator.check_and_apply(|prompt| confirm(prompt, assume_yes), &mut progress);
        match &result {
            UpdateResult::Applied { .. } => progress.finish("done"),
            UpdateResult::Failed(failure) => progress.abandon(failure.reason().to_string()),
            UpdateResult::AlreadyUpToDate(_) | UpdateResult::Declined => progress.clear(),
        }

        Ok(result)
    })
    .await??;

    match result {
        UpdateResult::AlreadyUpToDate(version) => {
            info!("already up to date at version {version}");
        }
        UpdateResult::Declined => info!("update declined"),
        UpdateResult::Applied { version, report } => {
            info!(
                "installed version {version}: {} replaced, {} added, {} skipped",
                report.replaced.len(),
                report.added.len(),
                report.skipped.len()
            );

            if restart.is_requested() && !opts.no_restart {
                relaunch_or_exit();
            }
        }
        UpdateResult::Failed(failure) => return Err(failure.into()),
    }

    Ok(())
}

fn run_version(config: UpdaterConfig) -> Result<()> {
    let store = FileVersionStore::new(config.install.version_path());
    match store.read() {
        Some(version) => info!("installed version {version}"),
        None => info!("installed version unknown"),
    }

    Ok(())
}

fn confirm(prompt: &UpdatePrompt<'_>, assume_yes: bool) -> bool {
    if assume_yes {
        return true;
    }

    let message = match prompt.local {
        Some(local) => format!("update from {local} to {}?", prompt.remote),
        None => format!("install version {}?", prompt.remote),
    };

    match Confirm::new(&message).with_default(false).prompt() {
        Ok(answer) => answer,
        Err(err) => {
            warn!("cannot ask for confirmation: {err}");
            false
        }
    }
}
