//! Lineage Core - domain kernel for dataset versioning
//!
//! This crate provides the pieces that do not touch storage:
//! - Version, lineage edge and model link records
//! - The structured error facility and the logging facility
//! - The content hasher (canonical table encoding + SHA-256 digest)
//! - Collaborator ports implemented by the store and engine crates
//! - Keyed advisory locks
//! - The pure retention planner

pub mod errors;
pub mod hasher;
pub mod locks;
pub mod logging_facility;
pub mod model;
pub mod ports;
pub mod retention;

#[doc(hidden)]
pub use lineage_core_types;

// Re-export commonly used types
pub use errors::{ExError, ExErrorKind, ExResult, LineageError, Result};
pub use hasher::{CanonicalContent, ContentDigest, ContentHasher, HashingOptions, Table};
pub use locks::{KeyGuard, KeyedLocks};
pub use model::{
    DatasetVersion, LineageHop, ModelTrainingLink, TransformationLineageEdge, TransformationStep,
    VersionState,
};
pub use retention::{plan_retention, RetentionNode, RetentionPlan, RetentionPolicy};
