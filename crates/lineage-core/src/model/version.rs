use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a dataset version
///
/// `Staged → Committed → Deleted`. Only Committed versions are visible to
/// readers; Deleted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionState {
    Staged,
    Committed,
    Deleted,
}

impl VersionState {
    /// Stable lowercase name used in persisted rows
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionState::Staged => "staged",
            VersionState::Committed => "committed",
            VersionState::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staged" => Some(VersionState::Staged),
            "committed" => Some(VersionState::Committed),
            "deleted" => Some(VersionState::Deleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for VersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable snapshot of a dataset
///
/// Several versions may share a `content_hash`, and then also share the
/// storage object behind `storage_location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    /// Externally unique opaque id (UUIDv7 unless supplied by the caller)
    pub version_id: String,

    /// `sha256:` digest of the canonical table content
    pub content_hash: String,

    /// None for root versions
    pub parent_version_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub row_count: u64,
    pub column_count: u64,

    /// Opaque object-store token, stored verbatim
    pub storage_location: String,

    /// Pinned versions are never removed by retention
    pub pinned: bool,

    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub state: VersionState,

    /// Soft-delete marker, kept until the audit window elapses
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DatasetVersion {
    pub fn is_root(&self) -> bool {
        self.parent_version_id.is_none()
    }

    pub fn is_committed(&self) -> bool {
        self.state == VersionState::Committed
    }

    pub fn is_deleted(&self) -> bool {
        self.state == VersionState::Deleted
    }

    /// Timestamp used to order retention candidates
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }
}
