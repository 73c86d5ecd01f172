//! Retention command
//!
//! Flags override the `[retention]` section of the configuration.

use clap::Args;
use lineage_engine::config::duration_days;
use lineage_engine::LineageConfig;

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct RetainArgs {
    #[arg(long)]
    pub max_per_root: Option<usize>,

    #[arg(long)]
    pub max_age_days: Option<i64>,

    #[arg(long)]
    pub min_age_days: Option<i64>,

    /// List the deleted version ids
    #[arg(long)]
    pub verbose: bool,
}

pub fn execute(args: RetainArgs, config: &LineageConfig) -> CommandResult {
    let mut policy = config.policy()?;
    if let Some(max) = args.max_per_root {
        policy = policy.with_max_versions_per_root(max);
    }
    if let Some(days) = args.max_age_days {
        policy = policy.with_max_age(duration_days("--max-age-days", days)?);
    }
    if let Some(days) = args.min_age_days {
        policy = policy.with_min_age(duration_days("--min-age-days", days)?);
    }

    let report = open_service(config)?.retention_report(&policy)?;
    if args.verbose {
        for version_id in &report.deleted {
            println!("{}", version_id);
        }
    }
    println!(
        "deleted {} (protected {}, skipped {})",
        report.deleted.len(),
        report.skipped_protected,
        report.skipped_unverified
    );
    Ok(())
}
