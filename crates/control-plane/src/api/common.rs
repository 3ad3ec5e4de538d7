// Common DTOs for public API
//
// These types are shared across multiple API endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use stepflow_core::EngineError;
use utoipa::ToSchema;

use crate::auth::AuthError;

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Error returned by handlers: a status code with an ErrorResponse body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::WorkflowNotFound(_)
            | EngineError::ViewNotFound { .. }
            | EngineError::StateNotFound { .. }
            | EngineError::RouteNotFound(_)
            | EngineError::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::DuplicateRoute { .. }
            | EngineError::DuplicateName { .. }
            | EngineError::InUse(_)
            | EngineError::LockConflict { .. }
            | EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::InvalidTransition { .. }
            | EngineError::ViewMismatch { .. }
            | EngineError::SubjectNotFound(_)
            | EngineError::FileNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NoStartRoute(_)
            | EngineError::ConsistencyViolation(_)
            | EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &err {
            EngineError::Storage(_) => "Internal server error".to_string(),
            _ => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }

        Self {
            status,
            body: ErrorResponse::new(message),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self {
            status: err.status,
            body: ErrorResponse::new(err.error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.body.into_response(self.status).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_engine_error_status_codes() {
        let cases = [
            (EngineError::InstanceNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                EngineError::InvalidTransition {
                    view: "A".into(),
                    state: "GO".into(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::LockConflict {
                    instance_id: Uuid::nil(),
                    actor_id: "u2".into(),
                },
                StatusCode::CONFLICT,
            ),
            (EngineError::NoStartRoute(Uuid::nil()), StatusCode::INTERNAL_SERVER_ERROR),
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let err = ApiError::from(EngineError::Storage("connection refused".into()));
        assert_eq!(err.body.error, "Internal server error");
    }
}
