// Advisory lock HTTP routes

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use stepflow_core::{LockOutcome, LockStatus};
use utoipa::IntoParams;
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse};
use crate::auth::{AuthActor, AuthState};
use crate::services::LockService;

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ReleaseQuery {
    /// Clear the lock whoever holds it (administrators only).
    #[serde(default)]
    pub force: bool,
}

/// App state for lock routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LockService>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Create lock routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/instances/:instance_id/lock",
            get(get_lock).post(acquire_lock).delete(release_lock),
        )
        .with_state(state)
}

/// GET /v1/instances/{instance_id}/lock - Current lock holder
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/lock",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Lock status", body = LockStatus),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "locks"
)]
pub async fn get_lock(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<LockStatus>> {
    Ok(Json(state.service.get(instance_id).await?))
}

/// POST /v1/instances/{instance_id}/lock - Try to take the lock
///
/// Never steals: when someone else holds the lock the response names them.
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/lock",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Acquisition outcome", body = LockOutcome),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "locks"
)]
pub async fn acquire_lock(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<LockOutcome>> {
    Ok(Json(state.service.acquire(instance_id, &actor).await?))
}

/// DELETE /v1/instances/{instance_id}/lock - Release the lock
#[utoipa::path(
    delete,
    path = "/v1/instances/{instance_id}/lock",
    params(("instance_id" = Uuid, Path, description = "Instance ID"), ReleaseQuery),
    responses(
        (status = 204, description = "Lock released"),
        (status = 403, description = "Force release requires an administrator", body = ErrorResponse),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 409, description = "Caller does not hold the lock", body = ErrorResponse)
    ),
    tag = "locks"
)]
pub async fn release_lock(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(instance_id): Path<Uuid>,
    Query(query): Query<ReleaseQuery>,
) -> ApiResult<StatusCode> {
    if query.force {
        actor.require_admin()?;
        state.service.force_release(instance_id).await?;
    } else {
        state.service.release(instance_id, &actor.0).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
