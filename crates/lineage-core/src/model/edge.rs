use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{LineageError, Result};

/// One transformation step, e.g. `{"type": "scale", "parameters": {"method": "standard"}}`
///
/// Parameters are opaque to the lineage engine and handed verbatim to the
/// transformation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    #[serde(rename = "type")]
    pub step_type: String,

    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl TransformationStep {
    /// Step with no parameters
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(step_type: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            step_type: step_type.into(),
            parameters,
        }
    }

    /// Validate a step list before it is applied or recorded
    ///
    /// # Errors
    ///
    /// `InvalidStep` when the list is empty, a step type is blank, or
    /// parameters are neither an object nor null.
    pub fn validate_all(steps: &[TransformationStep]) -> Result<()> {
        if steps.is_empty() {
            return Err(LineageError::InvalidStep {
                reason: "step list is empty".to_string(),
            });
        }
        for (idx, step) in steps.iter().enumerate() {
            if step.step_type.trim().is_empty() {
                return Err(LineageError::InvalidStep {
                    reason: format!("step {} has an empty type", idx),
                });
            }
            if !(step.parameters.is_object() || step.parameters.is_null()) {
                return Err(LineageError::InvalidStep {
                    reason: format!("step {} parameters must be an object", idx),
                });
            }
        }
        Ok(())
    }

    /// Parse a JSON array of steps
    ///
    /// # Errors
    ///
    /// `Serialization` for malformed JSON, `InvalidStep` when validation fails.
    pub fn parse_list(json: &str) -> Result<Vec<TransformationStep>> {
        let steps: Vec<TransformationStep> = serde_json::from_str(json)?;
        Self::validate_all(&steps)?;
        Ok(steps)
    }
}

impl std::fmt::Display for TransformationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.parameters {
            serde_json::Value::Object(map) if !map.is_empty() => {
                let params: Vec<String> = map
                    .iter()
                    .map(|(k, v)| match v {
                        serde_json::Value::String(s) => format!("{}={}", k, s),
                        other => format!("{}={}", k, other),
                    })
                    .collect();
                write!(f, "{}({})", self.step_type, params.join(", "))
            }
            _ => f.write_str(&self.step_type),
        }
    }
}

/// Directed edge recording that `target` was produced from `source`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationLineageEdge {
    pub edge_id: String,
    pub source_version_id: String,
    pub target_version_id: String,

    /// Applied in order
    pub steps: Vec<TransformationStep>,

    pub applied_at: DateTime<Utc>,
    pub applied_by: String,
}

/// One entry of an ancestor chain
///
/// The root hop has no edge and an empty step list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageHop {
    pub version_id: String,
    pub edge_id: Option<String>,
    pub steps: Vec<TransformationStep>,
    pub applied_at: Option<DateTime<Utc>>,
    pub applied_by: Option<String>,
}

impl LineageHop {
    pub fn root(version_id: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            edge_id: None,
            steps: Vec::new(),
            applied_at: None,
            applied_by: None,
        }
    }

    pub fn from_edge(edge: &TransformationLineageEdge) -> Self {
        Self {
            version_id: edge.target_version_id.clone(),
            edge_id: Some(edge.edge_id.clone()),
            steps: edge.steps.clone(),
            applied_at: Some(edge.applied_at),
            applied_by: Some(edge.applied_by.clone()),
        }
    }
}
