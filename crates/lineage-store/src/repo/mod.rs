//! Repository layer: the SQLite-backed metadata store

pub mod sqlite_repo;

pub use sqlite_repo::SqliteMetadataStore;
