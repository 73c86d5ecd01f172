// Shared fixtures for the engine integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::model::TransformationStep;
use lineage_core::ports::{
    LegacyRecordStore, LegacySummary, MetadataStore, ObjectStore, TransformationEngine,
};
use lineage_engine::{LegacyMirror, VersioningService};
use lineage_store::{FsObjectStore, SqliteMetadataStore};
use tempfile::TempDir;

/// Appends one `<step type>,<index>` row per step to a two-column table
pub struct AppendStepRows;

impl TransformationEngine for AppendStepRows {
    fn apply(&self, input: &[u8], steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
        let mut out = input.to_vec();
        for (i, step) in steps.iter().enumerate() {
            out.extend_from_slice(format!("{},{}\n", step.step_type, i).as_bytes());
        }
        Ok(out)
    }
}

pub struct Rejecting;

impl TransformationEngine for Rejecting {
    fn apply(&self, _input: &[u8], _steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
        Err(ExError::new(ExErrorKind::TransformationFailed).with_message("engine rejected input"))
    }
}

pub struct OfflineLegacy;

impl LegacyRecordStore for OfflineLegacy {
    fn write(&self, _summary: &LegacySummary) -> ExResult<()> {
        Err(ExError::new(ExErrorKind::Io).with_message("legacy store offline"))
    }
}

/// Filesystem object store whose writes can be switched off
pub struct FailingPuts {
    inner: FsObjectStore,
    failing: AtomicBool,
}

impl FailingPuts {
    pub fn new(inner: FsObjectStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl ObjectStore for FailingPuts {
    fn put(&self, bytes: &[u8]) -> ExResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExError::new(ExErrorKind::StorageFailure).with_message("disk unavailable"));
        }
        self.inner.put(bytes)
    }

    fn get(&self, location: &str) -> ExResult<Vec<u8>> {
        self.inner.get(location)
    }

    fn delete(&self, location: &str) -> ExResult<()> {
        self.inner.delete(location)
    }
}

pub struct Harness {
    pub service: Arc<VersioningService>,
    pub metadata: Arc<dyn MetadataStore>,
    pub dir: TempDir,
}

pub fn harness_with(
    engine: Arc<dyn TransformationEngine>,
    legacy: Option<Arc<dyn LegacyRecordStore>>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let metadata: Arc<dyn MetadataStore> =
        Arc::new(SqliteMetadataStore::open(dir.path().join("lineage.db")).unwrap());
    let objects = Arc::new(FsObjectStore::new(dir.path().join("objects")));

    let mut service = VersioningService::new(metadata.clone(), objects, engine);
    if let Some(legacy) = legacy {
        service = service.with_legacy_mirror(LegacyMirror::spawn(legacy, 16).unwrap());
    }
    Harness {
        service: Arc::new(service),
        metadata,
        dir,
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(AppendStepRows), None)
}

/// `id,value` table with `rows` data rows
pub fn table(rows: usize, seed: usize) -> Vec<u8> {
    let mut csv = String::from("id,value\n");
    for i in 0..rows {
        csv.push_str(&format!("{},{}\n", i, (i * 31 + seed) % 97));
    }
    csv.into_bytes()
}

pub fn step(name: &str) -> Vec<TransformationStep> {
    vec![TransformationStep::new(name)]
}
