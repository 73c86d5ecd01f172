use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Records that a model was trained on a specific dataset version
///
/// A model has exactly one training version; the version it points at is
/// protected from retention for as long as the link exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTrainingLink {
    pub model_id: String,
    pub dataset_version_id: String,
    pub created_at: DateTime<Utc>,
}

impl ModelTrainingLink {
    pub fn new(model_id: impl Into<String>, dataset_version_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dataset_version_id: dataset_version_id.into(),
            created_at: Utc::now(),
        }
    }
}
