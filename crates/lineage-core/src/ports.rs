//! Collaborator ports
//!
//! The versioning engine talks to storage, the transformation engine and
//! the legacy flat store only through these traits. Implementations live in
//! `lineage-store` (SQLite metadata, filesystem objects, JSONL legacy file)
//! and in callers (transformation engines).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExResult;
use crate::model::{DatasetVersion, ModelTrainingLink, TransformationLineageEdge, TransformationStep};

/// Opaque transformation function `(bytes, steps) -> bytes`
///
/// Failures should use `ExErrorKind::TransformationFailed`. Cancellation and
/// timeouts are the engine's own business.
pub trait TransformationEngine: Send + Sync {
    fn apply(&self, input: &[u8], steps: &[TransformationStep]) -> ExResult<Vec<u8>>;
}

/// Blob storage keyed by an opaque location token
pub trait ObjectStore: Send + Sync {
    /// Store bytes and return the location to persist verbatim
    fn put(&self, bytes: &[u8]) -> ExResult<String>;

    /// # Errors
    ///
    /// `NotFound` when nothing is stored at `location`.
    fn get(&self, location: &str) -> ExResult<Vec<u8>>;

    /// Remove the object; removing a missing object succeeds
    fn delete(&self, location: &str) -> ExResult<()>;
}

/// Flat summary mirrored into the legacy record store on ingest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacySummary {
    pub version_id: String,
    pub content_hash: String,
    pub row_count: u64,
    pub column_count: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub storage_location: String,
}

impl From<&DatasetVersion> for LegacySummary {
    fn from(v: &DatasetVersion) -> Self {
        Self {
            version_id: v.version_id.clone(),
            content_hash: v.content_hash.clone(),
            row_count: v.row_count,
            column_count: v.column_count,
            created_by: v.created_by.clone(),
            created_at: v.created_at,
            storage_location: v.storage_location.clone(),
        }
    }
}

/// Dual-write target during the migration window
pub trait LegacyRecordStore: Send + Sync {
    fn write(&self, summary: &LegacySummary) -> ExResult<()>;
}

/// Vendor-neutral record store for versions, edges, model links and
/// storage-object reference counts
///
/// Every method that touches more than one record must apply all of its
/// changes or none of them.
pub trait MetadataStore: Send + Sync {
    // ---- storage objects ----

    /// Location of the stored object for a content hash, if any
    fn object_location(&self, content_hash: &str) -> ExResult<Option<String>>;

    /// Live references (Staged and Committed versions) to a content hash
    fn object_ref_count(&self, content_hash: &str) -> ExResult<u64>;

    // ---- versions ----

    /// Insert a version in the Staged state and take a reference on its
    /// storage object, registering the object if it is new
    ///
    /// # Errors
    ///
    /// `Conflict` when the version id already exists.
    fn insert_staged(&self, version: &DatasetVersion, size_bytes: u64) -> ExResult<()>;

    /// Move a Staged version to Committed, inserting its parent edge in the
    /// same transaction
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Conflict` when the version is not
    /// Staged or the target already has an edge.
    fn commit_version(&self, version_id: &str, edge: Option<&TransformationLineageEdge>)
        -> ExResult<()>;

    /// Delete a Staged row and release its reference
    ///
    /// Returns the storage location when that was the last reference.
    fn remove_staged(&self, version_id: &str) -> ExResult<Option<String>>;

    /// Mark a Committed version Deleted and release its reference
    ///
    /// Returns the storage location when that was the last reference.
    fn mark_deleted(&self, version_id: &str, at: DateTime<Utc>) -> ExResult<Option<String>>;

    /// Hard-remove Deleted versions (and their edges) deleted before `cutoff`
    fn purge_deleted(&self, cutoff: DateTime<Utc>) -> ExResult<usize>;

    /// Ids of Staged versions created before `cutoff`
    fn staged_before(&self, cutoff: DateTime<Utc>) -> ExResult<Vec<String>>;

    /// Any version regardless of state
    fn get_version(&self, version_id: &str) -> ExResult<Option<DatasetVersion>>;

    fn list_committed(&self) -> ExResult<Vec<DatasetVersion>>;

    /// Committed children ordered by version id, strictly after `after`
    fn list_children_page(
        &self,
        parent_id: &str,
        after: Option<&str>,
        limit: usize,
    ) -> ExResult<Vec<String>>;

    /// Staged plus Committed children
    fn live_child_count(&self, parent_id: &str) -> ExResult<usize>;

    /// Bump access statistics; false when the version is not Committed
    fn record_access(&self, version_id: &str, at: DateTime<Utc>) -> ExResult<bool>;

    /// Set the pin flag; false when the version is not Committed
    fn set_pinned(&self, version_id: &str, pinned: bool) -> ExResult<bool>;

    // ---- lineage edges ----

    fn get_parent_edge(&self, child_id: &str) -> ExResult<Option<TransformationLineageEdge>>;

    /// Insert an edge and point the target's parent at the source
    ///
    /// # Errors
    ///
    /// `Conflict` when the target already has an edge.
    fn insert_edge(&self, edge: &TransformationLineageEdge) -> ExResult<()>;

    // ---- model links ----

    /// # Errors
    ///
    /// `Conflict` when the model already has a link.
    fn insert_model_link(&self, link: &ModelTrainingLink) -> ExResult<()>;

    fn get_model_link(&self, model_id: &str) -> ExResult<Option<ModelTrainingLink>>;

    fn model_links_for_version(&self, version_id: &str) -> ExResult<Vec<ModelTrainingLink>>;

    /// Every version id referenced by at least one model link
    fn linked_version_ids(&self) -> ExResult<HashSet<String>>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put(&self, bytes: &[u8]) -> ExResult<String> {
        (**self).put(bytes)
    }

    fn get(&self, location: &str) -> ExResult<Vec<u8>> {
        (**self).get(location)
    }

    fn delete(&self, location: &str) -> ExResult<()> {
        (**self).delete(location)
    }
}

impl<T: TransformationEngine + ?Sized> TransformationEngine for Arc<T> {
    fn apply(&self, input: &[u8], steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
        (**self).apply(input, steps)
    }
}

impl<T: LegacyRecordStore + ?Sized> LegacyRecordStore for Arc<T> {
    fn write(&self, summary: &LegacySummary) -> ExResult<()> {
        (**self).write(summary)
    }
}
