//! Retrieve command

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use lineage_engine::LineageConfig;

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct RetrieveArgs {
    pub version: String,

    /// Write here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Look up the version a model was trained on instead
    #[arg(long)]
    pub model: bool,
}

pub fn execute(args: RetrieveArgs, config: &LineageConfig) -> CommandResult {
    let service = open_service(config)?;
    let retrieved = if args.model {
        service.training_data_for_model(&args.version)?
    } else {
        service.retrieve(&args.version)?
    };

    match args.out {
        Some(path) => std::fs::write(path, &retrieved.bytes)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&retrieved.bytes)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
