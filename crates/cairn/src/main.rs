//! cairn: incremental code graph indexer
//!
//! Builds a file/declaration graph of a project with tree-sitter, keeps it
//! current as files change, and asks an LLM to summarize each declaration.

mod commands;
mod config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::Workspace;
use config::{CONFIG_FILE, Config};

/// Incremental code graph indexer with LLM enrichment
#[derive(Parser)]
#[command(name = "cairn")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .cairn directory or config file (default: search upward for .cairn/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a .cairn directory with a default config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Bring the graph up to date with the project tree
    Update,

    /// Summarize code nodes that have no summary yet
    Enrich {
        /// Nodes per provider call (default: from config)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Discard existing summaries and enrich everything
        #[arg(long)]
        force: bool,
    },

    /// Show node and edge counts
    Stats,

    /// List languages with a grammar and a query
    Languages,

    /// Print one node and its edges as JSON
    Show {
        /// Node id, e.g. `src/lib.rs` or `src/lib.rs::Parser`
        id: String,
    },

    /// Update the graph whenever project files change
    Watch,
}

/// Log to stderr, and also to `.cairn/logs/cairn.log` when `.cairn` exists.
fn init_logging(verbose: bool, cairn_dir: &Path) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = cairn_dir.is_dir().then(|| cairn_dir.join("logs")).and_then(|logs_dir| {
        if let Err(e) = std::fs::create_dir_all(&logs_dir) {
            eprintln!("Warning: Failed to create logs directory: {}", e);
            return None;
        }
        let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "cairn.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Dropping the guard stops the writer thread.
        static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD.set(guard);

        Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
}

/// Load config from an explicit path or by searching upward.
///
/// Returns the config and the `.cairn` directory relative paths resolve against.
fn load_config(override_path: Option<&PathBuf>) -> Result<(Config, PathBuf, bool)> {
    if let Some(path) = override_path {
        let config_file = if path.is_dir() || !path.exists() {
            path.join(CONFIG_FILE)
        } else {
            path.clone()
        };
        let cairn_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone());

        if !config_file.exists() {
            return Ok((Config::default(), cairn_dir, false));
        }
        let config = Config::from_file(&config_file)?;
        return Ok((config, cairn_dir, true));
    }

    match Config::find_and_load()? {
        Some((config, cairn_dir)) => Ok((config, cairn_dir, true)),
        None => Ok((Config::default(), Config::default_cairn_dir(), false)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, cairn_dir, found) = load_config(cli.config.as_ref())?;
    init_logging(cli.verbose, &cairn_dir);

    if found {
        info!("Loaded config from {}", cairn_dir.join(CONFIG_FILE).display());
    } else {
        debug!("No .cairn/config.toml found, using defaults");
    }

    if let Commands::Init { force } = cli.command {
        return commands::init(&cairn_dir, force);
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("Invalid config: {}", error);
        }
        anyhow::bail!("{} config error(s), see above", errors.len());
    }

    let workspace = Workspace::new(config, cairn_dir);

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Update => commands::update(&workspace),
        Commands::Enrich { batch_size, force } => {
            commands::enrich(&workspace, batch_size, force).await
        }
        Commands::Stats => commands::stats(&workspace),
        Commands::Languages => commands::languages(&workspace),
        Commands::Show { id } => commands::show(&workspace, &id),
        Commands::Watch => tokio::task::spawn_blocking(move || commands::watch(&workspace))
            .await
            .context("Watch task failed")?,
    }
}
