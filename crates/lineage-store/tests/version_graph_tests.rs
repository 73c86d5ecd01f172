// Integration tests for the Version Store and Lineage Graph over SQLite and
// the filesystem object store

use std::collections::HashSet;
use std::sync::Arc;

use lineage_core::errors::ExErrorKind;
use lineage_core::hasher::ContentHasher;
use lineage_core::model::{TransformationStep, VersionState};
use lineage_core::ports::MetadataStore;
use lineage_store::{
    FsObjectStore, LineageGraph, SqliteMetadataStore, VersionMetadata, VersionStore,
};
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    store: VersionStore,
    graph: LineageGraph,
    _dir: TempDir,
}

fn setup() -> Harness {
    let dir = TempDir::new().unwrap();
    let metadata: Arc<dyn MetadataStore> =
        Arc::new(SqliteMetadataStore::open(dir.path().join("lineage.db")).unwrap());
    let objects = Arc::new(FsObjectStore::new(dir.path().join("objects")));
    Harness {
        store: VersionStore::new(metadata.clone(), objects),
        graph: LineageGraph::new(metadata),
        _dir: dir,
    }
}

fn table(rows: usize, offset: usize) -> String {
    let mut csv = String::from("id,value\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{}\n", i, i + offset));
    }
    csv
}

/// Stage and commit a version, recording its parent edge in the same commit
fn commit(h: &Harness, parent: Option<&str>, raw: &str, steps: Vec<TransformationStep>) -> String {
    let content = ContentHasher::default().canonicalize(raw.as_bytes()).unwrap();
    let created = h
        .store
        .create_version(parent, &content, VersionMetadata::new("pipeline"))
        .unwrap();
    let id = created.version.version_id;

    match parent {
        Some(parent) => {
            let edge = h.graph.prepare_edge(parent, &id, steps, "pipeline").unwrap();
            h.store.commit(&id, Some(&edge)).unwrap();
        }
        None => {
            h.store.commit(&id, None).unwrap();
        }
    }
    id
}

#[test]
fn test_three_step_scenario_history() {
    let h = setup();

    let a = commit(&h, None, &table(100, 0), vec![]);
    let b = commit(
        &h,
        Some(&a),
        &table(90, 0),
        vec![TransformationStep::new("drop_missing")],
    );
    let scale = TransformationStep::with_parameters("scale", json!({"method": "standard"}));
    let c = commit(&h, Some(&b), &table(90, 7), vec![scale.clone()]);

    let chain = h.graph.ancestor_chain(&c).unwrap();
    let ids: Vec<&str> = chain.iter().map(|hop| hop.version_id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str()]);

    let steps: Vec<Vec<TransformationStep>> = chain.into_iter().map(|hop| hop.steps).collect();
    assert_eq!(
        steps,
        vec![
            vec![],
            vec![TransformationStep::new("drop_missing")],
            vec![scale],
        ]
    );

    let root = h.store.get_version(&a).unwrap();
    assert!(root.is_root());
    assert_eq!(root.row_count, 100);
    assert_eq!(h.store.get_version(&c).unwrap().parent_version_id.as_deref(), Some(b.as_str()));
}

#[test]
fn test_tree_invariant_over_branching_history() {
    let h = setup();
    let root = commit(&h, None, &table(3, 0), vec![]);

    let mut all = vec![root.clone()];
    for i in 1..12 {
        let parent = all[(i * 7) % all.len()].clone();
        let child = commit(
            &h,
            Some(&parent),
            &table(3, i),
            vec![TransformationStep::new(format!("step_{}", i))],
        );
        all.push(child);
    }

    for id in &all {
        let chain = h.graph.ancestor_chain(id).unwrap();
        assert_eq!(chain.first().map(|hop| hop.version_id.as_str()), Some(root.as_str()));
        assert_eq!(chain.last().map(|hop| hop.version_id.as_str()), Some(id.as_str()));

        let unique: HashSet<&str> = chain.iter().map(|hop| hop.version_id.as_str()).collect();
        assert_eq!(unique.len(), chain.len());

        for pair in chain.windows(2) {
            let child = h.store.get_version(&pair[1].version_id).unwrap();
            assert_eq!(child.parent_version_id.as_deref(), Some(pair[0].version_id.as_str()));
            assert!(pair[1].edge_id.is_some());
        }
    }

    let descendants = h.graph.descendant_versions(&root).unwrap();
    assert_eq!(descendants.len(), all.len() - 1);
}

#[test]
fn test_staged_child_is_invisible_until_committed() {
    let h = setup();
    let a = commit(&h, None, &table(2, 0), vec![]);

    let content = ContentHasher::default().canonicalize(table(2, 5).as_bytes()).unwrap();
    let staged = h
        .store
        .create_version(Some(&a), &content, VersionMetadata::new("pipeline"))
        .unwrap();
    let id = staged.version.version_id.clone();
    assert_eq!(staged.version.state, VersionState::Staged);

    assert_eq!(h.store.get_version(&id).unwrap_err().kind(), ExErrorKind::NotFound);
    assert_eq!(h.store.list_children(&a).unwrap().count(), 0);

    let edge = h
        .graph
        .prepare_edge(&a, &id, vec![TransformationStep::new("noop")], "pipeline")
        .unwrap();
    h.store.commit(&id, Some(&edge)).unwrap();

    let children: Vec<String> = h
        .store
        .list_children(&a)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(children, vec![id]);
}

#[test]
fn test_child_listing_resumes_from_cursor() {
    let h = setup();
    let root = commit(&h, None, &table(1, 0), vec![]);
    for i in 1..=5 {
        commit(
            &h,
            Some(&root),
            &table(1, i),
            vec![TransformationStep::new("s")],
        );
    }

    let mut iter = h.store.list_children(&root).unwrap();
    let first: Vec<String> = iter.by_ref().take(2).map(Result::unwrap).collect();
    let cursor = iter.cursor();
    drop(iter);

    let rest: Vec<String> = h
        .store
        .list_children_from(cursor)
        .map(Result::unwrap)
        .collect();
    assert_eq!(first.len() + rest.len(), 5);

    let mut all = first.clone();
    all.extend(rest);
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
}

#[test]
fn test_child_listing_rejects_staged_and_deleted_versions() {
    let h = setup();
    let a = commit(&h, None, &table(2, 0), vec![]);
    let b = commit(&h, Some(&a), &table(2, 1), vec![TransformationStep::new("s")]);

    let content = ContentHasher::default().canonicalize(table(2, 9).as_bytes()).unwrap();
    let staged = h
        .store
        .create_version(Some(&a), &content, VersionMetadata::new("pipeline"))
        .unwrap()
        .version
        .version_id;
    let kind = |id: &str| h.store.list_children(id).err().map(|e| e.kind());
    assert_eq!(kind(&staged), Some(ExErrorKind::NotFound));
    assert_eq!(kind("no-such-version"), Some(ExErrorKind::NotFound));

    h.store.soft_delete(&b).unwrap();
    assert_eq!(kind(&b), Some(ExErrorKind::NotFound));

    // the committed parent still lists, without the deleted child
    assert_eq!(h.store.list_children(&a).unwrap().count(), 0);
}

#[test]
fn test_soft_delete_then_purge() {
    let h = setup();
    let a = commit(&h, None, &table(2, 0), vec![]);
    let b = commit(&h, Some(&a), &table(2, 1), vec![TransformationStep::new("s")]);

    let deleted = h.store.soft_delete(&b).unwrap();
    assert_eq!(deleted.state, VersionState::Deleted);
    assert!(deleted.deleted_at.is_some());
    assert_eq!(h.store.get_version(&b).unwrap_err().kind(), ExErrorKind::NotFound);
    assert_eq!(h.store.object_refs(&deleted.content_hash).unwrap(), 0);

    let purged = h
        .store
        .purge_deleted(chrono::Utc::now() + chrono::Duration::seconds(1))
        .unwrap();
    assert_eq!(purged, 1);
    assert!(h.store.get_any(&b).unwrap().is_none());
    assert!(h.store.get_any(&a).unwrap().is_some());
}
