//! Lineage CLI
//!
//! Command-line interface over a local lineage data directory

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lineage_core::logging_facility;
use lineage_engine::LineageConfig;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "lineage")]
#[command(about = "Dataset versioning and lineage tracking", long_about = None)]
struct Cli {
    /// TOML configuration file; LINEAGE__* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides storage.data_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Store a table as a new root version
    Ingest(commands::ingest::IngestArgs),
    /// Derive a child version through an external program
    Transform(commands::transform::TransformArgs),
    /// Show a version's transformation history
    History(commands::history::HistoryArgs),
    /// Write a version's content to stdout or a file
    Retrieve(commands::retrieve::RetrieveArgs),
    /// Protect a version from deletion
    Pin(commands::protect::VersionArg),
    /// Remove deletion protection
    Unpin(commands::protect::VersionArg),
    /// Record the version a model was trained on
    LinkModel(commands::protect::LinkModelArgs),
    /// Delete a single unprotected leaf version
    Delete(commands::protect::VersionArg),
    /// Apply a retention policy
    Retain(commands::retain::RetainArgs),
    /// Discard staged versions left by an interrupted process
    Recover,
    /// Hard-remove versions deleted before the audit window
    Purge(commands::maintenance::PurgeArgs),
}

fn load_config(cli: &Cli) -> Result<LineageConfig, Box<dyn std::error::Error>> {
    let mut config = LineageConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| {
        logging_facility::init(config.logging.profile);
        match cli.command {
            Commands::Ingest(args) => commands::ingest::execute(args, &config),
            Commands::Transform(args) => commands::transform::execute(args, &config),
            Commands::History(args) => commands::history::execute(args, &config),
            Commands::Retrieve(args) => commands::retrieve::execute(args, &config),
            Commands::Pin(args) => commands::protect::pin(args, &config),
            Commands::Unpin(args) => commands::protect::unpin(args, &config),
            Commands::LinkModel(args) => commands::protect::link_model(args, &config),
            Commands::Delete(args) => commands::protect::delete(args, &config),
            Commands::Retain(args) => commands::retain::execute(args, &config),
            Commands::Recover => commands::maintenance::recover(&config),
            Commands::Purge(args) => commands::maintenance::purge(args, &config),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
