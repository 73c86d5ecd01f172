//! Restart recovery and hard purge

use clap::Args;
use lineage_engine::config::duration_days;
use lineage_engine::LineageConfig;

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Keep soft-deleted versions this many days (default from configuration)
    #[arg(long)]
    pub audit_days: Option<i64>,
}

pub fn recover(config: &LineageConfig) -> CommandResult {
    let purged = open_service(config)?.recover()?;
    println!("discarded {} staged versions", purged);
    Ok(())
}

pub fn purge(args: PurgeArgs, config: &LineageConfig) -> CommandResult {
    let window = match args.audit_days {
        Some(days) => duration_days("--audit-days", days)?,
        None => config.audit_window()?,
    };
    let purged = open_service(config)?.purge_deleted(window)?;
    println!("purged {} deleted versions", purged);
    Ok(())
}
