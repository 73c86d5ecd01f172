//! JSON-lines legacy record store
//!
//! Flat append-only file holding one summary per line. Stands in for the
//! legacy record store during the dual-write migration window.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lineage_core::errors::ExResult;
use lineage_core::ports::{LegacyRecordStore, LegacySummary};

use crate::errors::{io_error, json_error};

pub struct JsonlLegacyStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLegacyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every summary written so far, in write order
    pub fn read_all(&self) -> ExResult<Vec<LegacySummary>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("legacy_read", e)),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| json_error("legacy_read", e)))
            .collect()
    }
}

impl LegacyRecordStore for JsonlLegacyStore {
    fn write(&self, summary: &LegacySummary) -> ExResult<()> {
        let mut line = serde_json::to_string(summary).map_err(|e| json_error("legacy_write", e))?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| io_error("legacy_write", e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error("legacy_write", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_error("legacy_write", e))?;
        Ok(())
    }
}
