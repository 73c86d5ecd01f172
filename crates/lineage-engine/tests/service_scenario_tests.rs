// End-to-end behaviour of the versioning service over SQLite and the
// filesystem object store

mod common;

use std::sync::Arc;

use common::{harness, harness_with, step, table, AppendStepRows, FailingPuts, Rejecting};
use lineage_core::errors::ExErrorKind;
use lineage_core::hasher::ContentHasher;
use lineage_core::model::{TransformationStep, VersionState};
use lineage_core::ports::TransformationEngine;
use lineage_core::retention::RetentionPolicy;
use lineage_engine::VersioningService;
use lineage_store::{FsObjectStore, VersionMetadata, VersionStore};
use serde_json::json;

#[test]
fn test_three_step_history_and_protected_root() {
    let h = harness();
    let svc = &h.service;

    let a = svc.ingest(&table(100, 0), "alice").unwrap();
    assert_eq!(a.row_count, 100);
    assert!(svc.get_version(&a.version_id).unwrap().is_root());

    let b = svc
        .apply_transformation(&a.version_id, step("drop_missing"), "bob")
        .unwrap();
    let scale = vec![TransformationStep::with_parameters(
        "scale",
        json!({"method": "standard"}),
    )];
    let c = svc
        .apply_transformation(&b.version_id, scale.clone(), "bob")
        .unwrap();

    let history = svc.history(&c.version_id).unwrap();
    let ids: Vec<&str> = history.iter().map(|hop| hop.version_id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            a.version_id.as_str(),
            b.version_id.as_str(),
            c.version_id.as_str()
        ]
    );
    let steps: Vec<Vec<TransformationStep>> = history.into_iter().map(|hop| hop.steps).collect();
    assert_eq!(steps, vec![vec![], step("drop_missing"), scale]);

    let err = svc.delete_version(&a.version_id).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::RetentionViolation);
    let err = svc.delete_version(&b.version_id).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::RetentionViolation);

    // leaf-first deletion is allowed once nothing protects the chain
    svc.delete_version(&c.version_id).unwrap();
    svc.delete_version(&b.version_id).unwrap();
    svc.delete_version(&a.version_id).unwrap();
    assert_eq!(
        svc.retrieve(&a.version_id).unwrap_err().kind(),
        ExErrorKind::NotFound
    );
}

#[test]
fn test_identical_content_dedups_storage_not_identity() {
    let h = harness();
    let svc = &h.service;

    let first = svc.ingest(&table(10, 3), "alice").unwrap();
    let second = svc.ingest(&table(10, 3), "carol").unwrap();

    assert_ne!(first.version_id, second.version_id);
    assert_eq!(first.content_hash, second.content_hash);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);

    let r1 = svc.retrieve(&first.version_id).unwrap();
    let r2 = svc.retrieve(&second.version_id).unwrap();
    assert_eq!(r1.bytes, r2.bytes);
    assert_eq!(r1.version.storage_location, r2.version.storage_location);
    assert_eq!(svc.store().object_refs(&first.content_hash).unwrap(), 2);

    // dropping one reference keeps the shared object alive
    svc.delete_version(&first.version_id).unwrap();
    assert_eq!(svc.retrieve(&second.version_id).unwrap().bytes, r2.bytes);
    assert_eq!(svc.store().object_refs(&first.content_hash).unwrap(), 1);
}

#[test]
fn test_round_trip_is_byte_identical() {
    let h = harness();
    let svc = &h.service;

    let raw = table(25, 9);
    let root = svc.ingest(&raw, "alice").unwrap();
    assert_eq!(svc.retrieve(&root.version_id).unwrap().bytes, raw);

    let expected = AppendStepRows.apply(&raw, &step("impute")).unwrap();
    let child = svc
        .apply_transformation(&root.version_id, step("impute"), "bob")
        .unwrap();
    assert_eq!(svc.retrieve(&child.version_id).unwrap().bytes, expected);
}

#[test]
fn test_retrieve_counts_accesses() {
    let h = harness();
    let svc = &h.service;
    let v = svc.ingest(&table(2, 0), "alice").unwrap();

    svc.retrieve(&v.version_id).unwrap();
    svc.retrieve(&v.version_id).unwrap();

    let version = svc.get_version(&v.version_id).unwrap();
    assert_eq!(version.access_count, 2);
    assert!(version.last_accessed_at.is_some());
}

#[test]
fn test_model_link_recovers_training_bytes() {
    let h = harness();
    let svc = &h.service;

    let root = svc.ingest(&table(5, 1), "alice").unwrap();
    let child = svc
        .apply_transformation(&root.version_id, step("encode"), "bob")
        .unwrap();

    let link = svc.link_model("churn-model-v3", &child.version_id).unwrap();
    assert_eq!(link.dataset_version_id, child.version_id);

    let data = svc.training_data_for_model("churn-model-v3").unwrap();
    assert_eq!(data.version.version_id, child.version_id);
    assert_eq!(data.bytes, svc.retrieve(&child.version_id).unwrap().bytes);

    let links = svc.models_for_version(&child.version_id).unwrap();
    assert_eq!(links.len(), 1);

    // linked versions and their ancestors cannot be deleted
    assert_eq!(
        svc.delete_version(&child.version_id).unwrap_err().kind(),
        ExErrorKind::RetentionViolation
    );

    assert_eq!(
        svc.link_model("churn-model-v3", &root.version_id)
            .unwrap_err()
            .kind(),
        ExErrorKind::Conflict
    );
    assert_eq!(
        svc.training_data_for_model("unknown-model").unwrap_err().kind(),
        ExErrorKind::NotFound
    );
}

#[test]
fn test_link_to_missing_or_deleted_version_fails() {
    let h = harness();
    let svc = &h.service;

    assert_eq!(
        svc.link_model("m1", "no-such-version").unwrap_err().kind(),
        ExErrorKind::NotFound
    );

    let v = svc.ingest(&table(3, 0), "alice").unwrap();
    svc.delete_version(&v.version_id).unwrap();
    assert_eq!(
        svc.link_model("m1", &v.version_id).unwrap_err().kind(),
        ExErrorKind::NotFound
    );
}

#[test]
fn test_pin_blocks_deletion_until_unpinned() {
    let h = harness();
    let svc = &h.service;
    let v = svc.ingest(&table(3, 0), "alice").unwrap();

    svc.pin(&v.version_id).unwrap();
    assert!(svc.get_version(&v.version_id).unwrap().pinned);
    assert_eq!(
        svc.delete_version(&v.version_id).unwrap_err().kind(),
        ExErrorKind::RetentionViolation
    );

    svc.unpin(&v.version_id).unwrap();
    let deleted = svc.delete_version(&v.version_id).unwrap();
    assert_eq!(deleted.state, VersionState::Deleted);

    assert_eq!(svc.pin(&v.version_id).unwrap_err().kind(), ExErrorKind::NotFound);
}

#[test]
fn test_failed_transformation_leaves_no_version() {
    let h = harness_with(Arc::new(Rejecting), None);
    let svc = &h.service;
    let root = svc.ingest(&table(3, 0), "alice").unwrap();

    let err = svc
        .apply_transformation(&root.version_id, step("scale"), "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::TransformationFailed);

    assert_eq!(svc.children(&root.version_id).unwrap().count(), 0);
    assert_eq!(h.metadata.live_child_count(&root.version_id).unwrap(), 0);
    svc.delete_version(&root.version_id).unwrap();
}

#[test]
fn test_storage_failure_aborts_without_partial_version() {
    let h = harness();
    let objects = Arc::new(FailingPuts::new(FsObjectStore::new(
        h.dir.path().join("objects"),
    )));
    let svc = VersioningService::new(h.metadata.clone(), objects.clone(), Arc::new(AppendStepRows));
    let root = svc.ingest(&table(3, 0), "alice").unwrap();
    let committed_before = h.metadata.list_committed().unwrap();

    objects.set_failing(true);

    let fresh = table(5, 7);
    let err = svc.ingest(&fresh, "alice").unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::StorageFailure);

    let err = svc
        .apply_transformation(&root.version_id, step("scale"), "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::StorageFailure);

    assert_eq!(h.metadata.list_committed().unwrap(), committed_before);
    let staged = h
        .metadata
        .staged_before(chrono::Utc::now() + chrono::Duration::seconds(1))
        .unwrap();
    assert!(staged.is_empty(), "staged rows left: {:?}", staged);
    assert_eq!(svc.children(&root.version_id).unwrap().count(), 0);

    let hasher = ContentHasher::default();
    let mut transformed = table(3, 0);
    transformed.extend_from_slice(b"scale,0\n");
    for raw in [fresh, transformed] {
        let digest = hasher.canonicalize(&raw).unwrap().digest;
        assert_eq!(svc.store().object_refs(digest.as_str()).unwrap(), 0);
    }

    // the same calls go through once storage is back
    objects.set_failing(false);
    svc.ingest(&table(5, 7), "alice").unwrap();
    svc.apply_transformation(&root.version_id, step("scale"), "bob")
        .unwrap();
}

#[test]
fn test_invalid_input_is_rejected_before_any_write() {
    let h = harness();
    let svc = &h.service;

    let err = svc.ingest(b"a,b\n1\n", "alice").unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);

    let root = svc.ingest(&table(3, 0), "alice").unwrap();
    let err = svc
        .apply_transformation(&root.version_id, vec![], "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);

    let err = svc
        .apply_transformation("no-such-version", step("s"), "bob")
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::NotFound);
}

#[test]
fn test_duplicate_external_id_conflicts() {
    let h = harness();
    let svc = &h.service;

    svc.ingest_as(&table(3, 0), VersionMetadata::new("alice").with_version_id("ext-1"))
        .unwrap();
    let err = svc
        .ingest_as(&table(3, 1), VersionMetadata::new("alice").with_version_id("ext-1"))
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::Conflict);
    assert_eq!(svc.get_version("ext-1").unwrap().created_by, "alice");
}

#[test]
fn test_recover_purges_only_orphans_from_before_start() {
    let h = harness();
    let objects = Arc::new(FsObjectStore::new(h.dir.path().join("objects")));
    let previous_process = VersionStore::new(h.metadata.clone(), objects.clone());

    let content = ContentHasher::default().canonicalize(&table(4, 2)).unwrap();
    let orphan = previous_process
        .create_version(None, &content, VersionMetadata::new("crashed"))
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));

    let restarted = VersioningService::new(h.metadata.clone(), objects, Arc::new(AppendStepRows));
    let in_flight_content = ContentHasher::default().canonicalize(&table(4, 3)).unwrap();
    let in_flight = restarted
        .store()
        .create_version(None, &in_flight_content, VersionMetadata::new("live"))
        .unwrap();

    assert_eq!(restarted.recover().unwrap(), 1);
    assert!(restarted
        .store()
        .get_any(&orphan.version.version_id)
        .unwrap()
        .is_none());
    assert!(restarted
        .store()
        .get_any(&in_flight.version.version_id)
        .unwrap()
        .is_some());
    assert_eq!(restarted.store().object_refs(content.digest.as_str()).unwrap(), 0);
}

#[test]
fn test_purge_after_audit_window() {
    let h = harness();
    let svc = &h.service;
    let v = svc.ingest(&table(3, 0), "alice").unwrap();
    svc.delete_version(&v.version_id).unwrap();

    // still inside a one-day window
    assert_eq!(svc.purge_deleted(chrono::Duration::days(1)).unwrap(), 0);
    assert!(svc.store().get_any(&v.version_id).unwrap().is_some());

    assert_eq!(svc.purge_deleted(chrono::Duration::seconds(-1)).unwrap(), 1);
    assert!(svc.store().get_any(&v.version_id).unwrap().is_none());
}

#[test]
fn test_retention_prefers_least_recently_used_leaf() {
    let h = harness();
    let svc = &h.service;

    let root = svc.ingest(&table(3, 0), "alice").unwrap();
    let stale = svc
        .apply_transformation(&root.version_id, step("a"), "bob")
        .unwrap();
    let fresh = svc
        .apply_transformation(&root.version_id, step("b"), "bob")
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    svc.retrieve(&stale.version_id).unwrap();

    // the stale version was created first but accessed last
    let report = svc
        .retention_report(&RetentionPolicy::new().with_max_versions_per_root(2))
        .unwrap();
    assert_eq!(report.deleted, vec![fresh.version_id.clone()]);
    assert!(svc.get_version(&stale.version_id).is_ok());
    assert!(svc.get_version(&root.version_id).is_ok());
}
