mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;
use tokenpulse_core::paths;

#[derive(Parser)]
#[command(
    name = "tokenpulse",
    about = "Adaptive crypto-token monitor: polls market data and alerts on growth",
    version,
    propagate_version = true
)]
struct Cli {
    /// Working root (default: auto-detect from .tokenpulse/)
    #[arg(long, global = true, env = "TOKENPULSE_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring engine until Ctrl-C
    Run {
        /// Port for the HTTP status API
        #[arg(long, default_value = "3142")]
        port: u16,
        /// Don't start the HTTP status API
        #[arg(long)]
        no_server: bool,
    },

    /// Start tracking one or more tokens
    Track {
        /// Token contract / mint addresses
        #[arg(required = true)]
        ids: Vec<String>,
        /// Ticker symbol to record (applies to every id given)
        #[arg(long)]
        symbol: Option<String>,
    },

    /// Stop tracking a token (its history is kept)
    Untrack {
        /// Token contract / mint address
        id: String,
    },

    /// List tracked tokens
    List {
        /// Include tokens that are no longer tracked
        #[arg(long)]
        all: bool,
    },

    /// Manage .tokenpulse/config.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = paths::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Run { port, no_server } => cmd::run::run(&root, port, no_server),
        Commands::Track { ids, symbol } => cmd::track::track(&root, &ids, symbol, cli.json),
        Commands::Untrack { id } => cmd::track::untrack(&root, &id, cli.json),
        Commands::List { all } => cmd::list::run(&root, all, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
