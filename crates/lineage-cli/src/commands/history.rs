//! History command

use clap::Args;
use lineage_engine::LineageConfig;

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct HistoryArgs {
    pub version: String,

    /// Print the hops as a JSON array
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: HistoryArgs, config: &LineageConfig) -> CommandResult {
    let service = open_service(config)?;
    let hops = service.history(&args.version)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hops)?);
        return Ok(());
    }

    for hop in hops {
        let steps = if hop.steps.is_empty() {
            "(root)".to_string()
        } else {
            hop.steps
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" | ")
        };
        println!("{}\t{}", hop.version_id, steps);
    }
    Ok(())
}
