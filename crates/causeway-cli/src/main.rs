//! Causeway CLI - Load, snapshot and query causal assertion record sets
//!
//! A command-line interface over `causeway-core`: loads record sets through the
//! strategy selector and tiered cache, builds binary snapshots, converts to and from
//! the compact forms, and answers edge lookups.
//!
//! # Usage
//!
//! ```bash
//! # Load a record set and report how it was loaded
//! causeway load data/asthma.json
//!
//! # Look up a (subject, object) edge
//! causeway lookup asthma "Smoking" "Asthma"
//!
//! # Precompile a snapshot next to the source
//! causeway snapshot build data/asthma.json
//!
//! # Show cache statistics
//! causeway cache stats
//! ```

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use causeway_config::{LogFormat, LoggingConfig};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod progress;

/// Causeway - Fast loading and edge lookup for causal assertion record sets
#[derive(Parser, Debug)]
#[command(name = "causeway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Workspace root (defaults to the current directory)
    #[arg(long, short = 'w', global = true, env = "CAUSEWAY_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Path to an additional configuration file
    #[arg(long, short = 'c', global = true, env = "CAUSEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Bypass the record set cache
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> causeway_config::ConfigOverrides {
        causeway_config::ConfigOverrides {
            workspace_root: self.workspace.clone(),
            cache_enabled: self.no_cache.then_some(false),
            ..Default::default()
        }
    }

    /// Progress and chatter are hidden in quiet and JSON modes
    pub fn is_quiet(&self) -> bool {
        self.quiet || self.json
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a record set and report strategy, counts and cache origin
    Load(commands::load::LoadArgs),

    /// Look up a (subject, object) edge in a record set
    Lookup(commands::lookup::LookupArgs),

    /// Build or inspect binary snapshots
    #[command(subcommand)]
    Snapshot(commands::snapshot::SnapshotCommand),

    /// Convert an interchange file to the compact form
    Compact(commands::compact::CompactArgs),

    /// Convert a compact file or snapshot back to interchange JSON
    Expand(commands::compact::ExpandArgs),

    /// Inspect and maintain the record set cache
    #[command(subcommand)]
    Cache(commands::cache::CacheCommand),

    /// View and manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

/// Install the global subscriber.
///
/// `--verbose`/`--quiet` win, then `RUST_LOG`, then `logging.level`.
fn init_logging(global: &GlobalOptions, logging: &LoggingConfig) -> Result<()> {
    let filter = if global.quiet {
        EnvFilter::new("error")
    } else if global.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let writer = match logging.file {
        Some(ref path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(logging.file.is_none());

    let installed = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = commands::resolve_workspace(&cli.global)?;
    let config = commands::load_config(&cli.global, &root);

    let logging = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    init_logging(&cli.global, &logging)?;

    // Config commands must work even when the merged configuration is invalid
    match cli.command {
        Commands::Config(cmd) => commands::config::execute(cmd, &cli.global, &root),
        command => run(command, &commands::Workspace::new(root, config?, cli.global)),
    }
}

fn run(command: Commands, workspace: &commands::Workspace) -> Result<()> {
    match command {
        Commands::Load(args) => commands::load::execute(args, workspace),
        Commands::Lookup(args) => commands::lookup::execute(args, workspace),
        Commands::Snapshot(cmd) => commands::snapshot::execute(cmd, workspace),
        Commands::Compact(args) => commands::compact::execute_compact(args, workspace),
        Commands::Expand(args) => commands::compact::execute_expand(args, workspace),
        Commands::Cache(cmd) => commands::cache::execute(cmd, workspace),
        Commands::Config(cmd) => {
            commands::config::execute(cmd, &workspace.global, &workspace.root)
        }
    }
}
