//! Version Store
//!
//! Durable CRUD for version records and their storage-object pointers, with
//! hash-based deduplication. Versions are created Staged and become visible
//! to readers only once committed.

#![allow(clippy::result_large_err)]

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use lineage_core::errors::{ExError, ExErrorKind};
use lineage_core::hasher::CanonicalContent;
use lineage_core::locks::KeyedLocks;
use lineage_core::model::{DatasetVersion, TransformationLineageEdge, VersionState};
use lineage_core::ports::{MetadataStore, ObjectStore};
use uuid::Uuid;

use crate::errors::{version_not_found, Result};

const CHILD_PAGE_SIZE: usize = 64;

/// Timestamps are persisted with millisecond precision
pub(crate) fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Caller-supplied attributes of a new version
#[derive(Debug, Clone, Default)]
pub struct VersionMetadata {
    /// Externally supplied id; a UUIDv7 is generated when absent
    pub version_id: Option<String>,
    pub created_by: String,
}

impl VersionMetadata {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            version_id: None,
            created_by: created_by.into(),
        }
    }

    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CreatedVersion {
    pub version: DatasetVersion,
    /// The content was already stored; no new object was written
    pub deduplicated: bool,
}

/// Resume point for a child listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCursor {
    pub parent_id: String,
    /// Last child id already seen
    pub after: Option<String>,
}

/// Lazy, paged iterator over a version's committed children in id order
///
/// Pages are fetched on demand, so children committed while iterating are
/// picked up if their id sorts after the current position.
pub struct ChildIter {
    metadata: Arc<dyn MetadataStore>,
    parent_id: String,
    after: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl ChildIter {
    pub(crate) fn new(
        metadata: Arc<dyn MetadataStore>,
        parent_id: String,
        after: Option<String>,
    ) -> Self {
        Self {
            metadata,
            parent_id,
            after,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Position after the last child yielded so far
    pub fn cursor(&self) -> ChildCursor {
        ChildCursor {
            parent_id: self.parent_id.clone(),
            after: self.after.clone(),
        }
    }
}

impl Iterator for ChildIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.metadata.list_children_page(
                &self.parent_id,
                self.after.as_deref(),
                CHILD_PAGE_SIZE,
            ) {
                Ok(page) => {
                    self.exhausted = page.len() < CHILD_PAGE_SIZE;
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let next = self.buffer.pop_front()?;
        self.after = Some(next.clone());
        Some(Ok(next))
    }
}

pub struct VersionStore {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    hash_locks: KeyedLocks,
}

impl VersionStore {
    pub fn new(metadata: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            metadata,
            objects,
            hash_locks: KeyedLocks::new(),
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Create a Staged version for `content`
    ///
    /// When an object for the same content hash already exists its location
    /// is reused; the new version still gets its own identity. Writers of the
    /// same hash are serialised so the object is stored once.
    ///
    /// # Errors
    ///
    /// - `InvalidParent`: the parent is missing, staged or deleted
    /// - `Conflict`: the supplied version id already exists
    /// - `StorageFailure` / `Persistence`: nothing is left behind
    pub fn create_version(
        &self,
        parent_id: Option<&str>,
        content: &CanonicalContent,
        meta: VersionMetadata,
    ) -> Result<CreatedVersion> {
        if let Some(parent_id) = parent_id {
            let parent = self.metadata.get_version(parent_id)?;
            if !parent.as_ref().is_some_and(DatasetVersion::is_committed) {
                return Err(ExError::new(ExErrorKind::InvalidParent)
                    .with_op("create_version")
                    .with_entity_id(parent_id)
                    .with_message("Parent version is missing or not committed"));
            }
        }

        let version_id = meta
            .version_id
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let hash = content.digest.as_str();

        let _hash_guard = self.hash_locks.lock(hash);

        let (location, deduplicated) = match self.metadata.object_location(hash)? {
            Some(location) => (location, true),
            None => (self.objects.put(&content.bytes)?, false),
        };

        let version = DatasetVersion {
            version_id,
            content_hash: hash.to_string(),
            parent_version_id: parent_id.map(str::to_string),
            created_at: now_millis(),
            created_by: meta.created_by,
            row_count: content.row_count,
            column_count: content.column_count,
            storage_location: location,
            pinned: false,
            access_count: 0,
            last_accessed_at: None,
            state: VersionState::Staged,
            deleted_at: None,
        };

        if let Err(e) = self
            .metadata
            .insert_staged(&version, content.bytes.len() as u64)
        {
            if !deduplicated {
                // nobody else can reference the object: its row was never written
                if let Err(cleanup) = self.objects.delete(&version.storage_location) {
                    tracing::warn!(
                        location = %version.storage_location,
                        error = %cleanup,
                        "failed to remove object after aborted create"
                    );
                }
            }
            return Err(e.with_op("create_version"));
        }

        tracing::debug!(
            version_id = %version.version_id,
            content_hash = %version.content_hash,
            deduplicated,
            "staged version"
        );

        Ok(CreatedVersion {
            version,
            deduplicated,
        })
    }

    /// Committed version by id
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown, staged and deleted ids.
    pub fn get_version(&self, version_id: &str) -> Result<DatasetVersion> {
        match self.metadata.get_version(version_id)? {
            Some(v) if v.is_committed() => Ok(v),
            Some(v) if v.is_deleted() => Err(version_not_found(version_id)
                .with_op("get_version")
                .with_message("Version was deleted")),
            _ => Err(version_not_found(version_id).with_op("get_version")),
        }
    }

    /// Version in any state, including Staged and Deleted
    pub fn get_any(&self, version_id: &str) -> Result<Option<DatasetVersion>> {
        self.metadata.get_version(version_id)
    }

    /// Committed children of a version, lazily and in id order
    ///
    /// # Errors
    ///
    /// `NotFound` when the version is unknown, staged or deleted.
    pub fn list_children(&self, version_id: &str) -> Result<ChildIter> {
        if !self
            .metadata
            .get_version(version_id)?
            .is_some_and(|v| v.is_committed())
        {
            return Err(version_not_found(version_id).with_op("list_children"));
        }
        Ok(ChildIter::new(
            self.metadata.clone(),
            version_id.to_string(),
            None,
        ))
    }

    /// Resume a child listing from a cursor
    pub fn list_children_from(&self, cursor: ChildCursor) -> ChildIter {
        ChildIter::new(self.metadata.clone(), cursor.parent_id, cursor.after)
    }

    /// Bump access count and last-access time
    pub fn mark_accessed(&self, version_id: &str) -> Result<()> {
        if self.metadata.record_access(version_id, now_millis())? {
            Ok(())
        } else {
            Err(version_not_found(version_id).with_op("mark_accessed"))
        }
    }

    /// Stored bytes of a version
    pub fn read_content(&self, version: &DatasetVersion) -> Result<Vec<u8>> {
        self.objects
            .get(&version.storage_location)
            .map_err(|e| e.with_entity_id(version.version_id.clone()))
    }

    /// Make a Staged version visible, recording its parent edge atomically
    pub fn commit(
        &self,
        version_id: &str,
        edge: Option<&TransformationLineageEdge>,
    ) -> Result<DatasetVersion> {
        self.metadata.commit_version(version_id, edge)?;
        self.get_version(version_id)
    }

    /// Remove a Staged version, deleting its object if nothing else uses it
    pub fn discard_staged(&self, version_id: &str) -> Result<()> {
        let Some(version) = self.metadata.get_version(version_id)? else {
            return Ok(());
        };
        let _hash_guard = self.hash_locks.lock(&version.content_hash);

        if let Some(location) = self.metadata.remove_staged(version_id)? {
            self.objects.delete(&location)?;
        }
        tracing::debug!(version_id, "discarded staged version");
        Ok(())
    }

    pub fn set_pinned(&self, version_id: &str, pinned: bool) -> Result<()> {
        if self.metadata.set_pinned(version_id, pinned)? {
            Ok(())
        } else {
            Err(version_not_found(version_id).with_op("set_pinned"))
        }
    }

    /// Mark a Committed version Deleted and release its storage reference
    ///
    /// Protection checks belong to the caller; this only enforces the state
    /// machine.
    pub fn soft_delete(&self, version_id: &str) -> Result<DatasetVersion> {
        let Some(version) = self.metadata.get_version(version_id)? else {
            return Err(version_not_found(version_id).with_op("soft_delete"));
        };
        let _hash_guard = self.hash_locks.lock(&version.content_hash);

        if let Some(location) = self.metadata.mark_deleted(version_id, now_millis())? {
            self.objects.delete(&location)?;
            tracing::debug!(version_id, location = %location, "released last reference");
        }

        self.metadata
            .get_version(version_id)?
            .ok_or_else(|| version_not_found(version_id).with_op("soft_delete"))
    }

    /// Hard-remove versions soft-deleted before `older_than`
    pub fn purge_deleted(&self, older_than: DateTime<Utc>) -> Result<usize> {
        self.metadata.purge_deleted(older_than)
    }

    /// Discard Staged versions created before `cutoff`
    pub fn purge_staged(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let orphans = self.metadata.staged_before(cutoff)?;
        for version_id in &orphans {
            self.discard_staged(version_id)?;
        }
        Ok(orphans.len())
    }

    /// Live references to the object behind a content hash
    pub fn object_refs(&self, content_hash: &str) -> Result<u64> {
        self.metadata.object_ref_count(content_hash)
    }
}
