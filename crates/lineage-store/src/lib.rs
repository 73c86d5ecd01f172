//! Lineage Store - persistence for dataset versions
//!
//! Provides:
//! - SQLite metadata store with an embedded migrations framework
//! - Filesystem content-addressed object store (atomic writes, sharding)
//! - A retrying object-store adapter with bounded backoff
//! - The Version Store and Lineage Graph components
//! - A JSON-lines legacy record store for dual-write

pub mod cas;
pub mod db;
pub mod errors;
pub mod graph;
pub mod legacy;
pub mod migrations;
pub mod repo;
pub mod version_store;

// Re-export key types
pub use cas::{FsObjectStore, RetryConfig, RetryingObjectStore};
pub use errors::Result;
pub use graph::LineageGraph;
pub use legacy::JsonlLegacyStore;
pub use repo::SqliteMetadataStore;
pub use version_store::{ChildCursor, ChildIter, CreatedVersion, VersionMetadata, VersionStore};
