//! Nodehost CLI - repository and package management for the nodehost runtime.
//!
//! Every command opens the package state under the nodehost home directory
//! (`$NODEHOST_HOME`, or `~/.nodehost`), does its work, and exits.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nodehost_capabilities::PathCapability;
use nodehost_config::Config;
use nodehost_core::NodeHostHome;
use nodehost_packages::InheritanceMode;
use nodehost_telemetry::{LogConfig, LogFormat, log_config_from, setup_logging};

mod commands;
mod theme;

use commands::package::{self, InstallOptions};
use commands::{open_manager, repo};
use theme::{Status, Theme};

/// Nodehost - plugin package manager
#[derive(Parser)]
#[command(name = "nodehost")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Home directory (defaults to $NODEHOST_HOME, then ~/.nodehost)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage package repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Refresh repositories and list available packages
    Search {
        /// Filter by id, name, or description
        query: Option<String>,
    },

    /// Install a package from an enabled repository
    Install {
        /// Package id, optionally `id@version`
        package: String,

        /// Process namespace to install into (defaults to the package id)
        #[arg(long)]
        process: Option<String>,

        /// How the package relates to the namespace
        #[arg(long, default_value = "standalone")]
        mode: InheritanceMode,

        /// Extra grant as `operation:pattern:justification` (repeatable)
        #[arg(long = "grant", value_name = "OP:PATTERN:WHY")]
        grants: Vec<PathCapability>,

        /// Approve the installation and its grants
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove an installed package
    Uninstall {
        /// Package id
        id: String,
    },

    /// List installed packages
    List,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// List configured repositories
    List,
    /// Add a repository
    Add {
        /// Repository id
        id: String,
        /// Package-list URL (`https://`, `http://` or `file://`)
        url: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        /// Verification key URL
        #[arg(long)]
        key_url: Option<String>,
    },
    /// Remove a repository
    Remove {
        /// Repository id
        id: String,
    },
    /// Enable a repository
    Enable {
        /// Repository id
        id: String,
    },
    /// Disable a repository
    Disable {
        /// Repository id
        id: String,
    },
}

fn init_logging(config: Option<&Config>, verbose: bool) {
    let mut log_config = config
        .and_then(|c| log_config_from(&c.logging).ok())
        .unwrap_or_else(|| LogConfig::new("warn").with_format(LogFormat::Compact));
    if verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let home = match cli.home {
        Some(root) => NodeHostHome::from_path(root),
        None => NodeHostHome::resolve().context("cannot locate the nodehost home directory")?,
    };
    let config = match Config::load(&home) {
        Ok(config) => config,
        Err(e) => {
            init_logging(None, cli.verbose);
            return Err(e).context("failed to load configuration");
        },
    };
    init_logging(Some(&config), cli.verbose);

    let manager = open_manager(&home, &config).await?;
    match cli.command {
        Commands::Repo { command } => match command {
            RepoCommands::List => repo::list_repositories(&manager).await?,
            RepoCommands::Add {
                id,
                url,
                name,
                key_url,
            } => {
                repo::add_repository(&manager, &id, &url, name.as_deref(), key_url.as_deref())
                    .await?;
            },
            RepoCommands::Remove { id } => repo::remove_repository(&manager, &id).await?,
            RepoCommands::Enable { id } => repo::set_repository_enabled(&manager, &id, true).await?,
            RepoCommands::Disable { id } => {
                repo::set_repository_enabled(&manager, &id, false).await?;
            },
        },
        Commands::Search { query } => package::search_packages(&manager, query.as_deref()).await?,
        Commands::Install {
            package,
            process,
            mode,
            grants,
            yes,
        } => {
            let options = InstallOptions {
                package: &package,
                process: process.as_deref(),
                mode,
                grants: &grants,
                yes,
            };
            package::install_package(&manager, options).await?;
        },
        Commands::Uninstall { id } => package::uninstall_package(&manager, &id).await?,
        Commands::List => package::list_installed(&manager),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", Theme::status(Status::Failed, &format!("{e:#}")));
            ExitCode::FAILURE
        },
    }
}
