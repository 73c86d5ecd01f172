//! Filesystem object store, content-addressed by construction

#![allow(clippy::result_large_err)]

use crate::cas::atomic::atomic_write;
use crate::cas::sharding::{is_content_address, shard_path};
use crate::errors::{invalid_location, object_corrupted, object_missing, storage_io, Result};
use lineage_core::ports::ObjectStore;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores each object at `<root>/<ab>/<sha256 hex>`
///
/// The location returned by `put` is the hex SHA-256 of the bytes, so equal
/// content always lands on the same file and `get` can verify integrity.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &str) -> Result<PathBuf> {
        if !is_content_address(location) {
            return Err(invalid_location(location));
        }
        Ok(shard_path(&self.root, location))
    }
}

fn address_of(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

impl ObjectStore for FsObjectStore {
    /// Idempotent: an intact existing object is left untouched, a damaged
    /// one is rewritten
    fn put(&self, bytes: &[u8]) -> Result<String> {
        let location = address_of(bytes);
        let path = shard_path(&self.root, &location);

        match fs::read(&path) {
            Ok(existing) if address_of(&existing) == location => return Ok(location),
            Ok(_) => tracing::warn!(location = %location, "rewriting damaged object"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(storage_io("object_put", e)),
        }

        atomic_write(&path, bytes)?;
        tracing::debug!(location = %location, size = bytes.len(), "stored object");
        Ok(location)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>> {
        let path = self.path_for(location)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(object_missing(location)),
            Err(e) => return Err(storage_io("object_get", e)),
        };

        let actual = address_of(&bytes);
        if actual != location {
            return Err(object_corrupted(location, &actual));
        }
        Ok(bytes)
    }

    fn delete(&self, location: &str) -> Result<()> {
        let path = self.path_for(location)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(location = %location, "deleted object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_io("object_delete", e)),
        }
    }
}
