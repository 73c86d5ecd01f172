//! Subcommand implementations

use std::sync::Arc;

use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::model::TransformationStep;
use lineage_core::ports::TransformationEngine;
use lineage_engine::{LineageConfig, VersioningService};

pub mod history;
pub mod ingest;
pub mod maintenance;
pub mod protect;
pub mod retain;
pub mod retrieve;
pub mod transform;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Engine for commands that never transform
struct NoEngine;

impl TransformationEngine for NoEngine {
    fn apply(&self, _input: &[u8], _steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
        Err(ExError::new(ExErrorKind::TransformationFailed)
            .with_message("No transformation program given"))
    }
}

pub fn open_service(config: &LineageConfig) -> ExResult<VersioningService> {
    VersioningService::open(config, Arc::new(NoEngine))
}
