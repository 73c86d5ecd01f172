//! Pinning, model links and explicit deletion

use clap::Args;
use lineage_engine::LineageConfig;

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct VersionArg {
    pub version: String,
}

#[derive(Debug, Args)]
pub struct LinkModelArgs {
    pub model: String,
    pub version: String,
}

pub fn pin(args: VersionArg, config: &LineageConfig) -> CommandResult {
    open_service(config)?.pin(&args.version)?;
    println!("pinned {}", args.version);
    Ok(())
}

pub fn unpin(args: VersionArg, config: &LineageConfig) -> CommandResult {
    open_service(config)?.unpin(&args.version)?;
    println!("unpinned {}", args.version);
    Ok(())
}

pub fn link_model(args: LinkModelArgs, config: &LineageConfig) -> CommandResult {
    let link = open_service(config)?.link_model(&args.model, &args.version)?;
    println!("linked {} -> {}", link.model_id, link.dataset_version_id);
    Ok(())
}

pub fn delete(args: VersionArg, config: &LineageConfig) -> CommandResult {
    open_service(config)?.delete_version(&args.version)?;
    println!("deleted {}", args.version);
    Ok(())
}
