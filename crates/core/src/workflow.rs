// Workflow catalog types
//
// A workflow owns its views (steps) and states (outcomes). Names are unique
// per workflow and are the stable keys routes and trail entries refer to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::{EngineError, Result};

/// A named process definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Workflow {
    /// Unique identifier for the workflow.
    pub id: Uuid,
    /// Unique workflow name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Kind of business subject instances are bound to (e.g. "job_application").
    /// Selects the subject provider consulted on start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_kind: Option<String>,
    /// Timestamp when the workflow was created.
    pub created_at: DateTime<Utc>,
}

/// A named step in a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowView {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A named outcome that can be chosen at a view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct WorkflowState {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Validate a workflow, view or state name.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{kind} name must not be empty")));
    }
    if trimmed.len() != name.len() {
        return Err(EngineError::Validation(format!(
            "{kind} name must not have leading or trailing whitespace"
        )));
    }
    if name.chars().count() > 128 {
        return Err(EngineError::Validation(format!(
            "{kind} name must be at most 128 characters"
        )));
    }
    Ok(())
}
