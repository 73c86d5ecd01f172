//! Versioning Service
//!
//! Orchestrates the hasher, Version Store and Lineage Graph into the public
//! operations. Each call runs inside its own span tagged with a fresh
//! request id and logs one start event and one terminal event.
//!
//! Locking:
//! - operations that read-then-write a version (transform from it, pin,
//!   link, delete) hold that version's advisory lock for their duration
//! - writers of the same content hash are serialised inside the Version Store
//! - the retention sweep only `try_lock`s, so it never waits on requests

#![allow(clippy::result_large_err)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::hasher::{ContentHasher, HashingOptions};
use lineage_core::locks::KeyedLocks;
use lineage_core::model::{DatasetVersion, LineageHop, ModelTrainingLink, TransformationStep};
use lineage_core::ports::{LegacySummary, MetadataStore, ObjectStore, TransformationEngine};
use lineage_core::retention::{plan_retention, RetentionNode, RetentionPolicy};
use lineage_core::{log_op_end, log_op_error, log_op_start};
use lineage_core_types::schema::EVENT_RETENTION_SKIP;
use lineage_core_types::RequestId;
use lineage_store::{
    ChildIter, FsObjectStore, JsonlLegacyStore, LineageGraph, RetryingObjectStore,
    SqliteMetadataStore, VersionMetadata, VersionStore,
};

use crate::config::LineageConfig;
use crate::dual_write::{LegacyMirror, MirrorStats, MirrorStatus};

#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub version_id: String,
    pub content_hash: String,
    pub row_count: u64,
    pub column_count: u64,
    /// The bytes were already stored under another version
    pub deduplicated: bool,
    /// `Stale` means the version exists but the legacy store will not see it
    pub legacy_mirror: MirrorStatus,
}

#[derive(Debug, Clone)]
pub struct TransformationReceipt {
    pub version_id: String,
    pub edge_id: String,
    pub content_hash: String,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct RetrievedVersion {
    pub version: DatasetVersion,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Leaf-first deletion order
    pub deleted: Vec<String>,
    /// Versions kept because they or a descendant are pinned or linked
    pub skipped_protected: usize,
    /// Planned deletions abandoned because verification failed or the
    /// version was busy
    pub skipped_unverified: usize,
}

pub struct VersioningService {
    store: VersionStore,
    graph: LineageGraph,
    metadata: Arc<dyn MetadataStore>,
    engine: Arc<dyn TransformationEngine>,
    hasher: ContentHasher,
    mirror: Option<LegacyMirror>,
    version_locks: KeyedLocks,
    started_at: DateTime<Utc>,
}

impl VersioningService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        engine: Arc<dyn TransformationEngine>,
    ) -> Self {
        Self {
            store: VersionStore::new(metadata.clone(), objects),
            graph: LineageGraph::new(metadata.clone()),
            metadata,
            engine,
            hasher: ContentHasher::default(),
            mirror: None,
            version_locks: KeyedLocks::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_legacy_mirror(mut self, mirror: LegacyMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_hashing(mut self, options: HashingOptions) -> Self {
        self.hasher = ContentHasher::new(options);
        self
    }

    /// Wire SQLite metadata, filesystem objects (with retries) and, when
    /// enabled, the JSONL legacy mirror from configuration
    ///
    /// # Errors
    ///
    /// `Io` when the data directory cannot be created, `Persistence` when the
    /// database cannot be opened or migrated.
    pub fn open(config: &LineageConfig, engine: Arc<dyn TransformationEngine>) -> ExResult<Self> {
        create_dir(&config.storage.data_dir)?;
        let database = config.database_path();
        if let Some(parent) = database.parent() {
            create_dir(parent)?;
        }

        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(&database)?);
        let objects: Arc<dyn ObjectStore> = Arc::new(RetryingObjectStore::new(
            FsObjectStore::new(config.objects_dir()),
            config.storage.retry.clone(),
        ));

        let mut service = Self::new(metadata, objects, engine).with_hashing(config.hashing);
        if config.dual_write.enabled {
            let legacy = Arc::new(JsonlLegacyStore::new(config.legacy_path()));
            service = service.with_legacy_mirror(LegacyMirror::spawn(
                legacy,
                config.dual_write.queue_capacity,
            )?);
        }

        tracing::debug!(
            database = %database.display(),
            objects = %config.objects_dir().display(),
            dual_write = config.dual_write.enabled,
            "opened versioning service"
        );
        Ok(service)
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn graph(&self) -> &LineageGraph {
        &self.graph
    }

    /// Run `f` as one observable operation
    fn observe<T>(
        &self,
        op: &'static str,
        entity_id: &str,
        f: impl FnOnce() -> ExResult<T>,
    ) -> ExResult<T> {
        let request_id = RequestId::new();
        let span = tracing::info_span!("lineage_op", op, request_id = %request_id);
        let _entered = span.enter();

        let start = Instant::now();
        log_op_start!(op, entity_id = entity_id);
        match f() {
            Ok(value) => {
                log_op_end!(op, duration_ms = start.elapsed().as_millis() as u64);
                Ok(value)
            }
            Err(e) => {
                let e = e.with_request_id(request_id);
                log_op_error!(op, e, duration_ms = start.elapsed().as_millis() as u64);
                Err(e)
            }
        }
    }

    // ---- ingest and transform ----

    /// Hash and store raw tabular content as a new root version
    ///
    /// The summary is mirrored into the legacy store in the background; a
    /// mirror failure shows up in the receipt and the logs, never as an
    /// error.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for unparseable content, `StorageFailure` or
    /// `Persistence` when nothing could be stored.
    pub fn ingest(&self, raw: &[u8], uploader: &str) -> ExResult<IngestReceipt> {
        self.ingest_as(raw, VersionMetadata::new(uploader))
    }

    /// Like `ingest`, optionally with a caller-supplied version id
    ///
    /// # Errors
    ///
    /// As `ingest`, plus `Conflict` when the supplied id already exists.
    pub fn ingest_as(&self, raw: &[u8], meta: VersionMetadata) -> ExResult<IngestReceipt> {
        let entity = meta.version_id.clone().unwrap_or_default();
        self.observe("ingest", &entity, || {
            let content = self.hasher.canonicalize(raw)?;
            let created = self.store.create_version(None, &content, meta)?;
            let version_id = created.version.version_id.clone();

            let version = match self.store.commit(&version_id, None) {
                Ok(version) => version,
                Err(e) => {
                    self.discard_after_failure(&version_id);
                    return Err(e.with_op("ingest"));
                }
            };

            let legacy_mirror = match &self.mirror {
                Some(mirror) => mirror.submit(LegacySummary::from(&version)),
                None => MirrorStatus::Disabled,
            };

            Ok(IngestReceipt {
                version_id,
                content_hash: version.content_hash,
                row_count: version.row_count,
                column_count: version.column_count,
                deduplicated: created.deduplicated,
                legacy_mirror,
            })
        })
    }

    /// Run the transformation engine over a version and record the result
    /// as its child
    ///
    /// The child row and its lineage edge become visible together, in one
    /// commit; on any failure neither does.
    ///
    /// # Errors
    ///
    /// - `NotFound`: the source version is missing or deleted
    /// - `InvalidInput`: the steps are invalid or the output is not a table
    /// - `TransformationFailed`: the engine rejected the input
    /// - `StorageFailure` / `Persistence`: nothing was committed
    pub fn apply_transformation(
        &self,
        version_id: &str,
        steps: Vec<TransformationStep>,
        operator: &str,
    ) -> ExResult<TransformationReceipt> {
        const OP: &str = "apply_transformation";
        self.observe(OP, version_id, || {
            TransformationStep::validate_all(&steps).map_err(|e| ExError::from(e).with_op(OP))?;

            let _guard = self.version_locks.lock(version_id);
            let parent = self.store.get_version(version_id)?;
            let input = self.store.read_content(&parent)?;

            let output = self
                .engine
                .apply(&input, &steps)
                .map_err(|e| e.with_op(OP).with_entity_id(version_id))?;
            let content = self.hasher.canonicalize(&output)?;

            let created = self.store.create_version(
                Some(version_id),
                &content,
                VersionMetadata::new(operator),
            )?;
            let child_id = created.version.version_id.clone();

            let committed = self
                .graph
                .prepare_edge(version_id, &child_id, steps, operator)
                .and_then(|edge| {
                    let edge_id = edge.edge_id.clone();
                    self.store.commit(&child_id, Some(&edge)).map(|_| edge_id)
                });

            match committed {
                Ok(edge_id) => Ok(TransformationReceipt {
                    version_id: child_id,
                    edge_id,
                    content_hash: created.version.content_hash,
                    deduplicated: created.deduplicated,
                }),
                Err(e) => {
                    self.discard_after_failure(&child_id);
                    Err(e.with_op(OP))
                }
            }
        })
    }

    fn discard_after_failure(&self, version_id: &str) {
        if let Err(e) = self.store.discard_staged(version_id) {
            // recover() picks it up after a restart
            tracing::warn!(version_id, error = %e, "could not discard staged version");
        }
    }

    // ---- models ----

    /// Record that `model_id` was trained on `version_id`
    ///
    /// # Errors
    ///
    /// `NotFound` when the version is unknown or deleted, `Conflict` when the
    /// model already has a training version.
    pub fn link_model(&self, model_id: &str, version_id: &str) -> ExResult<ModelTrainingLink> {
        self.observe("link_model", version_id, || {
            let _guard = self.version_locks.lock(version_id);
            self.store.get_version(version_id)?;

            let link = ModelTrainingLink::new(model_id, version_id);
            self.metadata
                .insert_model_link(&link)
                .map_err(|e| e.with_op("link_model").with_entity_id(model_id))?;
            Ok(link)
        })
    }

    pub fn models_for_version(&self, version_id: &str) -> ExResult<Vec<ModelTrainingLink>> {
        self.observe("models_for_version", version_id, || {
            self.store.get_version(version_id)?;
            self.metadata.model_links_for_version(version_id)
        })
    }

    /// The exact bytes `model_id` was trained on
    ///
    /// # Errors
    ///
    /// `NotFound` when the model has no link.
    pub fn training_data_for_model(&self, model_id: &str) -> ExResult<RetrievedVersion> {
        self.observe("training_data_for_model", model_id, || {
            let link = self.metadata.get_model_link(model_id)?.ok_or_else(|| {
                ExError::new(ExErrorKind::NotFound)
                    .with_op("training_data_for_model")
                    .with_entity_id(model_id)
                    .with_message("Model has no training link")
            })?;
            self.retrieve_inner(&link.dataset_version_id)
        })
    }

    // ---- reads ----

    /// Stored bytes and metadata of a committed version
    ///
    /// Counts as an access for retention scoring.
    pub fn retrieve(&self, version_id: &str) -> ExResult<RetrievedVersion> {
        self.observe("retrieve", version_id, || self.retrieve_inner(version_id))
    }

    fn retrieve_inner(&self, version_id: &str) -> ExResult<RetrievedVersion> {
        // the sweep skips locked versions, so the bytes cannot go mid-read
        let _guard = self.version_locks.lock(version_id);
        let version = self.store.get_version(version_id)?;
        let bytes = self.store.read_content(&version)?;
        self.store.mark_accessed(version_id)?;
        Ok(RetrievedVersion { version, bytes })
    }

    pub fn get_version(&self, version_id: &str) -> ExResult<DatasetVersion> {
        self.store.get_version(version_id)
    }

    /// Root-first history of a version with the steps behind each hop
    pub fn history(&self, version_id: &str) -> ExResult<Vec<LineageHop>> {
        self.observe("history", version_id, || self.graph.ancestor_chain(version_id))
    }

    pub fn descendants(&self, version_id: &str) -> ExResult<BTreeSet<String>> {
        self.observe("descendants", version_id, || {
            self.store.get_version(version_id)?;
            self.graph.descendant_versions(version_id)
        })
    }

    pub fn children(&self, version_id: &str) -> ExResult<ChildIter> {
        self.store.list_children(version_id)
    }

    // ---- protection and deletion ----

    pub fn pin(&self, version_id: &str) -> ExResult<()> {
        self.observe("pin", version_id, || {
            let _guard = self.version_locks.lock(version_id);
            self.store.set_pinned(version_id, true)
        })
    }

    pub fn unpin(&self, version_id: &str) -> ExResult<()> {
        self.observe("unpin", version_id, || {
            let _guard = self.version_locks.lock(version_id);
            self.store.set_pinned(version_id, false)
        })
    }

    /// Explicitly delete one version
    ///
    /// Only unpinned, unlinked leaves can go; interior versions carry the
    /// history of everything below them.
    ///
    /// # Errors
    ///
    /// `RetentionViolation` for protected or interior versions, `NotFound`
    /// for unknown or already deleted ones.
    pub fn delete_version(&self, version_id: &str) -> ExResult<DatasetVersion> {
        self.observe("delete_version", version_id, || {
            let _guard = self.version_locks.lock(version_id);
            let version = self.store.get_version(version_id)?;
            if let Some(reason) = self.protection_reason(&version)? {
                return Err(ExError::new(ExErrorKind::RetentionViolation)
                    .with_op("delete_version")
                    .with_entity_id(version_id)
                    .with_message(reason));
            }
            self.store.soft_delete(version_id)
        })
    }

    /// Why a committed version must not be deleted, if anything
    fn protection_reason(&self, version: &DatasetVersion) -> ExResult<Option<&'static str>> {
        if version.pinned {
            return Ok(Some("Version is pinned"));
        }
        if !self
            .metadata
            .model_links_for_version(&version.version_id)?
            .is_empty()
        {
            return Ok(Some("Version is linked to a trained model"));
        }
        if self.metadata.live_child_count(&version.version_id)? > 0 {
            return Ok(Some("Version has live descendants"));
        }
        Ok(None)
    }

    // ---- retention ----

    /// Delete what `policy` allows and return how many versions went
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an invalid policy; storage errors abort the sweep
    /// part-way, leaving already deleted versions deleted.
    pub fn apply_retention(&self, policy: &RetentionPolicy) -> ExResult<usize> {
        self.retention_report(policy).map(|report| report.deleted.len())
    }

    pub fn retention_report(&self, policy: &RetentionPolicy) -> ExResult<RetentionReport> {
        self.observe("apply_retention", "", || {
            let linked = self.metadata.linked_version_ids()?;
            let nodes: Vec<RetentionNode> = self
                .metadata
                .list_committed()?
                .into_iter()
                .map(|v| RetentionNode {
                    protected_self: v.pinned || linked.contains(&v.version_id),
                    version_id: v.version_id,
                    parent_id: v.parent_version_id,
                    created_at: v.created_at,
                    last_accessed_at: v.last_accessed_at,
                })
                .collect();

            let plan = plan_retention(&nodes, policy, Utc::now())?;

            let mut report = RetentionReport {
                skipped_protected: plan.protected.len(),
                ..RetentionReport::default()
            };
            for version_id in plan.deletions {
                let Some(_guard) = self.version_locks.try_lock(&version_id) else {
                    skip(&version_id, "busy");
                    report.skipped_unverified += 1;
                    continue;
                };

                // verify-then-delete: the snapshot may be stale by now
                let current = match self.metadata.get_version(&version_id)? {
                    Some(v) if v.is_committed() => v,
                    _ => {
                        skip(&version_id, "no longer committed");
                        report.skipped_unverified += 1;
                        continue;
                    }
                };
                if let Some(reason) = self.protection_reason(&current)? {
                    skip(&version_id, reason);
                    report.skipped_unverified += 1;
                    continue;
                }

                self.store.soft_delete(&version_id)?;
                report.deleted.push(version_id);
            }

            tracing::info!(
                deleted = report.deleted.len(),
                skipped_protected = report.skipped_protected,
                skipped_unverified = report.skipped_unverified,
                "retention sweep finished"
            );
            Ok(report)
        })
    }

    // ---- maintenance ----

    /// Discard Staged versions left behind by a previous process
    ///
    /// Only rows created before this service started are touched, so
    /// in-flight operations are safe.
    pub fn recover(&self) -> ExResult<usize> {
        self.observe("recover", "", || {
            let purged = self.store.purge_staged(self.started_at)?;
            if purged > 0 {
                tracing::info!(purged, "discarded orphaned staged versions");
            }
            Ok(purged)
        })
    }

    /// Hard-remove versions soft-deleted longer ago than `audit_window`
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the window reaches past the earliest representable
    /// time.
    pub fn purge_deleted(&self, audit_window: chrono::Duration) -> ExResult<usize> {
        self.observe("purge_deleted", "", || {
            let cutoff = Utc::now().checked_sub_signed(audit_window).ok_or_else(|| {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_op("purge_deleted")
                    .with_message("Audit window is out of range")
            })?;
            self.store.purge_deleted(cutoff)
        })
    }

    /// Wait for queued legacy writes; a no-op without a mirror
    pub fn flush_mirror(&self) {
        if let Some(mirror) = &self.mirror {
            mirror.flush();
        }
    }

    pub fn mirror_stats(&self) -> Option<MirrorStats> {
        self.mirror.as_ref().map(LegacyMirror::stats)
    }
}

fn skip(version_id: &str, reason: &str) {
    tracing::info!(event = EVENT_RETENTION_SKIP, version_id, reason, "kept retention candidate");
}

fn create_dir(path: &Path) -> ExResult<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|e| {
        ExError::new(ExErrorKind::Io)
            .with_op("open")
            .with_entity_id(path.display().to_string())
            .with_message(e.to_string())
    })
}
