//! Shared vocabulary for the lineage error and logging facilities
//!
//! - `RequestId`, the correlation id attached to spans and errors
//! - Canonical structured-log field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::RequestId;
