//! Content-addressed object storage
//!
//! Provides:
//! - Filesystem object store keyed by the SHA-256 of the stored bytes
//! - Atomic writes (temp file + rename)
//! - Sharding by the first 2 hex chars of the address
//! - A retrying adapter for transient storage failures

mod atomic;
mod fs_store;
mod retry;
mod sharding;

pub use fs_store::FsObjectStore;
pub use retry::{RetryConfig, RetryingObjectStore};
