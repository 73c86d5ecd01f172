//! Lineage Engine - orchestration layer
//!
//! Coordinates the core hasher and retention planner with the persistence
//! layer, and owns the background concerns: the legacy dual-write mirror and
//! the retention sweeper.

pub mod config;
pub mod dual_write;
pub mod retention;
pub mod service;

pub use config::LineageConfig;
pub use dual_write::{LegacyMirror, MirrorStats, MirrorStatus};
pub use retention::{RetentionSweeper, SweepSchedule};
pub use lineage_store::VersionMetadata;
pub use service::{
    IngestReceipt, RetentionReport, RetrievedVersion, TransformationReceipt, VersioningService,
};
