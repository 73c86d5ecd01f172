//! Atomic write primitives

#![allow(clippy::result_large_err)]

use crate::errors::{storage_io, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Write `content` to `target_path` so readers see all of it or nothing
///
/// Each call writes its own uniquely named temp file in the target directory
/// and renames it into place, so concurrent writers of the same object never
/// share a temp file.
pub fn atomic_write(target_path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_io("create_object_dir", e))?;
    }

    let file_name = target_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = target_path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let written = fs::File::create(&temp_path).and_then(|mut file| {
        file.write_all(content)?;
        file.sync_all()
    });
    if let Err(e) = written {
        fs::remove_file(&temp_path).ok();
        return Err(storage_io("write_object_temp", e));
    }

    fs::rename(&temp_path, target_path).map_err(|e| {
        fs::remove_file(&temp_path).ok();
        storage_io("rename_object_temp", e)
    })
}
