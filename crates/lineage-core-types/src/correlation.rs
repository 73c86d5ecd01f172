//! Request correlation
//!
//! Every public versioning operation runs inside a span carrying a
//! `RequestId`, so log lines from the store, the lineage graph and the
//! legacy mirror can be tied back to the call that caused them. Errors
//! returned from an operation carry the same id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time-ordered id of one service call (UUIDv7)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Adopt an id minted by a caller, e.g. one received from an upstream
/// job scheduler
impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
