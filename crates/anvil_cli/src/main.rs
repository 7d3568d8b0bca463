//! Anvil CLI: maintenance commands for the anvil asset build engine.
//!
//! Provides `anvil serve` to share a local cache over the network,
//! `anvil state` to inspect and edit the build-state store, `anvil cache`
//! for local cache maintenance, and `anvil config check` to validate
//! `anvil.toml`.

#![warn(missing_docs)]

mod cache;
mod config;
mod serve;
mod state;

use std::path::PathBuf;
use std::process;

use anvil_common::Identity;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Anvil: incremental, content-addressed asset builds.
#[derive(Parser, Debug)]
#[command(name = "anvil", version, about = "Anvil asset build engine")]
pub struct Cli {
    /// Only log errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory containing `anvil.toml`.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub project: PathBuf,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the project's local cache to remote clients.
    Serve(ServeArgs),
    /// Inspect or edit the build-state store.
    State {
        /// What to do with the store.
        #[command(subcommand)]
        action: StateAction,
    },
    /// Maintain the local content cache.
    Cache {
        /// What to do with the cache.
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Work with `anvil.toml`.
    Config {
        /// What to do with the configuration.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `anvil serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7878")]
    pub bind: String,

    /// Cache directory to serve. Defaults to the configured local cache.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Reject writes from clients.
    #[arg(long)]
    pub read_only: bool,

    /// Connections served concurrently; others wait for a free worker.
    #[arg(long, default_value_t = anvil_cache::DEFAULT_SERVER_WORKERS)]
    pub workers: usize,
}

/// `anvil state` actions.
#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Print every recorded fingerprint.
    Show {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Drop records so the next build rebuilds those assets.
    Forget {
        /// Identities as UUIDs or asset names.
        #[arg(required = true)]
        identities: Vec<String>,
    },
}

/// `anvil cache` actions.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Remove entries no build-state record refers to.
    Gc {
        /// Highest transform version whose entries are kept.
        #[arg(long, default_value_t = 16)]
        max_version: u32,
    },
    /// Remove every entry.
    Clear,
    /// Print the number of entries.
    Stats,
}

/// `anvil config` actions.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Parse and validate `anvil.toml`, then print the resolved settings.
    Check,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Project directory.
    pub project: PathBuf,
}

/// Parses a UUID, or derives the identity from an asset name.
pub fn parse_identity(text: &str) -> Identity {
    text.parse().unwrap_or_else(|_| Identity::from_name(text))
}

fn default_filter(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(verbose, quiet).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let global = GlobalArgs {
        project: cli.project,
    };

    let result = match cli.command {
        Command::Serve(ref args) => serve::run(args, &global),
        Command::State { ref action } => state::run(action, &global),
        Command::Cache { ref action } => cache::run(action, &global),
        Command::Config { ref action } => config::run(action, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}
