//! Ingest command

use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use lineage_engine::{LineageConfig, MirrorStatus, VersionMetadata};

use super::{open_service, CommandResult};

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Delimited table to ingest; `-` reads stdin
    pub file: PathBuf,

    /// Uploader recorded on the version
    #[arg(long = "by")]
    pub uploader: String,

    /// Use this version id instead of a generated one
    #[arg(long)]
    pub id: Option<String>,
}

pub fn execute(args: IngestArgs, config: &LineageConfig) -> CommandResult {
    let raw = if args.file.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        std::fs::read(&args.file)?
    };

    let service = open_service(config)?;
    let mut meta = VersionMetadata::new(args.uploader);
    if let Some(id) = args.id {
        meta = meta.with_version_id(id);
    }

    let receipt = service.ingest_as(&raw, meta)?;
    service.flush_mirror();

    if receipt.deduplicated {
        eprintln!("content already stored as {}", receipt.content_hash);
    }
    if let MirrorStatus::Stale(warning) = &receipt.legacy_mirror {
        eprintln!("warning: {}", warning);
    }
    println!("{}", receipt.version_id);
    Ok(())
}
