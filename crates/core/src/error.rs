// Engine error taxonomy
//
// Every failure is reported where it happens; the engine never retries.
// Retry policy (if any) belongs to the caller.

use thiserror::Error;
use uuid::Uuid;

/// Result type used across the engine
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("view '{name}' not found in workflow {workflow_id}")]
    ViewNotFound { workflow_id: Uuid, name: String },

    #[error("state '{name}' not found in workflow {workflow_id}")]
    StateNotFound { workflow_id: Uuid, name: String },

    /// Route lookup by id or by (view, state) found nothing
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// No edge matches the submitted (view, state) for the instance's workflow
    #[error("invalid transition: no route from view '{view}' with state '{state}'")]
    InvalidTransition { view: String, state: String },

    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Workflow has no entry point. Configuration error, never retried.
    #[error("workflow {0} has no start route")]
    NoStartRoute(Uuid),

    #[error("route already exists for view '{view}' and state '{state}'")]
    DuplicateRoute { view: String, state: String },

    #[error("{kind} '{name}' already exists")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{0}")]
    InUse(String),

    /// Release attempted by someone other than the lock holder
    #[error("lock on instance {instance_id} is not held by {actor_id}")]
    LockConflict { instance_id: Uuid, actor_id: String },

    /// Stale writer: the instance moved on since the caller read it
    #[error("instance {instance_id} version conflict: expected {expected}, current {actual}")]
    Conflict {
        instance_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Strict view order is on and the submitted view is not the pending one
    #[error("instance awaits view '{expected}', got '{submitted}'")]
    ViewMismatch { expected: String, submitted: String },

    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Trail and instance out of sync. Requires manual reconciliation.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Whether the caller can fix the request and try again.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Self::NoStartRoute(_) | Self::ConsistencyViolation(_) | Self::Storage(_)
        )
    }

    /// Only transient storage failures are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err = EngineError::NoStartRoute(Uuid::nil());
        assert!(!err.is_client_error());
        assert!(!err.is_retryable());

        let err = EngineError::ConsistencyViolation("trail missing".into());
        assert!(!err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = EngineError::InvalidTransition {
            view: "A".into(),
            state: "GO".into(),
        };
        assert!(err.is_client_error());
        assert_eq!(
            err.to_string(),
            "invalid transition: no route from view 'A' with state 'GO'"
        );
    }
}
