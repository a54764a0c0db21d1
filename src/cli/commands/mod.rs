//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod init;
mod seed;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::models::EdgeKind;

#[derive(Parser)]
#[command(name = "snowball")]
#[command(about = "Snowball crawler for community link graphs")]
#[command(version)]
pub struct Cli {
    /// Data directory or database file (overrides config file).
    /// Can be a directory containing snowball.db or a .db file directly.
    #[arg(long, short = 'd', global = true)]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Admit seed communities into a frontier at depth 0
    Seed {
        /// Frontier to seed (hyperlink, reference, moderator)
        frontier: String,
        /// Community names
        names: Vec<String>,
        /// Read additional names from a file, one per line
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Run the snowball crawl until the frontier is exhausted
    Run {
        /// Frontiers to run, in order (default: all)
        frontiers: Vec<String>,
        /// Run every frontier
        #[arg(short, long)]
        all: bool,
        /// Answer fetches from a JSON fixture instead of the network
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },

    /// Show crawl status
    Status {
        /// Limit frontier and edge counts to one frontier
        frontier: Option<String>,
    },
}

/// Parse a frontier name given on the command line.
fn parse_frontier(name: &str) -> anyhow::Result<EdgeKind> {
    EdgeKind::from_str(&name.trim().to_lowercase()).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown frontier '{}' (expected one of: hyperlink, reference, moderator)",
            name
        )
    })
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Seed {
            frontier,
            names,
            file,
        } => {
            let kind = parse_frontier(&frontier)?;
            seed::cmd_seed(&settings, kind, names, file.as_deref()).await
        }
        Commands::Run {
            frontiers,
            all,
            fixtures,
        } => {
            let kinds = if all || frontiers.is_empty() {
                EdgeKind::ALL.to_vec()
            } else {
                let mut kinds = frontiers
                    .iter()
                    .map(|f| parse_frontier(f))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                kinds.sort();
                kinds.dedup();
                kinds
            };
            crawl::cmd_run(&settings, &kinds, fixtures.as_deref()).await
        }
        Commands::Status { frontier } => {
            let kind = frontier.as_deref().map(parse_frontier).transpose()?;
            status::cmd_status(&settings, kind).await
        }
    }
}
