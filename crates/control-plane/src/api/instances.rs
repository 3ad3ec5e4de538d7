// Instance HTTP routes: start, transition, reads and trail
//
// Decision: Only the list endpoint applies the visibility filter; a caller
//           that knows an instance id may read it

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use stepflow_core::{Instance, InstancePredicate};
use utoipa::IntoParams;
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};
use crate::auth::{AuthActor, AuthState};
use crate::services::{
    InstanceDetails, InstanceService, StartInstance, TrailEntryDetails, TransitionInput,
};

/// Filters for listing instances. All given filters must match.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListInstancesQuery {
    pub workflow_id: Option<Uuid>,
    pub subject_id: Option<String>,
    /// Instances awaiting an action from this role.
    pub awaiting_role: Option<String>,
    /// Instances this user has acted on.
    pub touched_by: Option<String>,
    /// Instances whose lock this user holds.
    pub held_by: Option<String>,
}

impl ListInstancesQuery {
    pub fn to_predicate(&self) -> InstancePredicate {
        let mut predicate = InstancePredicate::Any;
        if let Some(id) = self.workflow_id {
            predicate = predicate.and(InstancePredicate::Workflow(id));
        }
        if let Some(subject) = &self.subject_id {
            predicate = predicate.and(InstancePredicate::Subject(subject.clone()));
        }
        if let Some(role) = &self.awaiting_role {
            predicate = predicate.and(InstancePredicate::AwaitingRole(role.clone()));
        }
        if let Some(user) = &self.touched_by {
            predicate = predicate.and(InstancePredicate::TouchedByUser(user.clone()));
        }
        if let Some(user) = &self.held_by {
            predicate = predicate.and(InstancePredicate::HeldBy(user.clone()));
        }
        predicate
    }
}

/// App state for instance routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InstanceService>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Create instance routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/instances", post(start_instance).get(list_instances))
        .route(
            "/v1/instances/:instance_id",
            get(get_instance).delete(delete_instance),
        )
        .route("/v1/instances/:instance_id/transitions", post(transition))
        .route("/v1/instances/:instance_id/trail", get(get_trail))
        .with_state(state)
}

/// POST /v1/instances - Start an instance at its workflow's start route
#[utoipa::path(
    post,
    path = "/v1/instances",
    request_body = StartInstance,
    responses(
        (status = 201, description = "Instance started", body = Instance),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 422, description = "Unknown subject", body = ErrorResponse),
        (status = 500, description = "Workflow has no start route", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn start_instance(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(req): Json<StartInstance>,
) -> ApiResult<(StatusCode, Json<Instance>)> {
    let instance = state.service.start(req, &actor).await?;
    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /v1/instances - List instances visible to the caller, newest first
#[utoipa::path(
    get,
    path = "/v1/instances",
    params(ListInstancesQuery),
    responses(
        (status = 200, description = "List of instances", body = ListResponse<Instance>)
    ),
    tag = "instances"
)]
pub async fn list_instances(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Query(query): Query<ListInstancesQuery>,
) -> ApiResult<Json<ListResponse<Instance>>> {
    let instances = state.service.list(query.to_predicate(), &actor).await?;
    Ok(Json(ListResponse::new(instances)))
}

/// GET /v1/instances/{instance_id} - Get an instance with display names
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Instance found", body = InstanceDetails),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<InstanceDetails>> {
    Ok(Json(state.service.get_details(instance_id).await?))
}

/// DELETE /v1/instances/{instance_id} - Delete an instance and its trail
#[utoipa::path(
    delete,
    path = "/v1/instances/{instance_id}",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 204, description = "Instance deleted"),
        (status = 403, description = "Administrator access required", body = ErrorResponse),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn delete_instance(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    actor.require_admin()?;
    state.service.delete(instance_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/instances/{instance_id}/transitions - Submit an action
#[utoipa::path(
    post,
    path = "/v1/instances/{instance_id}/transitions",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    request_body = TransitionInput,
    responses(
        (status = 200, description = "Transition applied", body = Instance),
        (status = 404, description = "Instance not found", body = ErrorResponse),
        (status = 409, description = "Instance changed since expected_version", body = ErrorResponse),
        (status = 422, description = "No route for the submitted view and state", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn transition(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(instance_id): Path<Uuid>,
    Json(req): Json<TransitionInput>,
) -> ApiResult<Json<Instance>> {
    let instance = state.service.transition(instance_id, req, &actor).await?;
    Ok(Json(instance))
}

/// GET /v1/instances/{instance_id}/trail - Trail entries in creation order
#[utoipa::path(
    get,
    path = "/v1/instances/{instance_id}/trail",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Trail entries", body = ListResponse<TrailEntryDetails>),
        (status = 404, description = "Instance not found", body = ErrorResponse)
    ),
    tag = "instances"
)]
pub async fn get_trail(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<TrailEntryDetails>>> {
    Ok(Json(ListResponse::new(
        state.service.trail(instance_id).await?,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_matches_everything() {
        let predicate = ListInstancesQuery::default().to_predicate();
        assert!(matches!(predicate, InstancePredicate::Any));
    }

    #[test]
    fn test_query_filters_are_conjoined() {
        let query = ListInstancesQuery {
            subject_id: Some("s1".into()),
            awaiting_role: Some("roleX".into()),
            ..Default::default()
        };
        match query.to_predicate() {
            InstancePredicate::And(terms) => assert_eq!(terms.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }
}
