// Workflow catalog HTTP routes: workflows, views and states
//
// Decision: Reads are open to every authenticated caller; writes require an administrator

use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepflow_core::{Workflow, WorkflowState, WorkflowView};
use utoipa::ToSchema;
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};
use crate::auth::{AuthActor, AuthState};
use crate::services::WorkflowService;

/// Request to create a workflow
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    /// Unique display name of the workflow.
    #[schema(example = "Job application review")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Kind of business subject instances are bound to. Selects the subject
    /// provider used to check and describe subjects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "application")]
    pub subject_kind: Option<String>,
}

/// Request carrying a single name, used for views and states
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NameRequest {
    #[schema(example = "REVIEW")]
    pub name: String,
}

/// App state for workflow catalog routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<WorkflowService>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Create workflow catalog routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/v1/workflows/:workflow_id",
            get(get_workflow).delete(delete_workflow),
        )
        .route(
            "/v1/workflows/:workflow_id/views",
            post(create_view).get(list_views),
        )
        .route(
            "/v1/workflows/:workflow_id/views/:view_id",
            get(get_view).patch(rename_view).delete(delete_view),
        )
        .route(
            "/v1/workflows/:workflow_id/states",
            post(create_state).get(list_states),
        )
        .route(
            "/v1/workflows/:workflow_id/states/:state_id",
            get(get_state).patch(rename_state).delete(delete_state),
        )
        .with_state(state)
}

/// POST /v1/workflows - Create a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = Workflow),
        (status = 400, description = "Invalid name", body = ErrorResponse),
        (status = 403, description = "Administrator access required", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    actor: AuthActor,
    Json(req): Json<CreateWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    actor.require_admin()?;
    let workflow = state.service.create(req).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows - List workflows, newest first
#[utoipa::path(
    get,
    path = "/v1/workflows",
    responses(
        (status = 200, description = "List of workflows", body = ListResponse<Workflow>)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    _actor: AuthActor,
) -> ApiResult<Json<ListResponse<Workflow>>> {
    Ok(Json(ListResponse::new(state.service.list().await?)))
}

/// GET /v1/workflows/{workflow_id} - Get a workflow
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow found", body = Workflow),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.service.get(workflow_id).await?))
}

/// DELETE /v1/workflows/{workflow_id} - Delete a workflow and its catalog
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 204, description = "Workflow deleted"),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Workflow still has instances", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    actor.require_admin()?;
    state.service.delete(workflow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// Views
// ============================================

/// POST /v1/workflows/{workflow_id}/views - Add a view
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/views",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = NameRequest,
    responses(
        (status = 201, description = "View created", body = WorkflowView),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn create_view(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<NameRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowView>)> {
    actor.require_admin()?;
    let view = state.service.create_view(workflow_id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /v1/workflows/{workflow_id}/views - List views in creation order
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/views",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "List of views", body = ListResponse<WorkflowView>),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn list_views(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<WorkflowView>>> {
    Ok(Json(ListResponse::new(
        state.service.list_views(workflow_id).await?,
    )))
}

/// GET /v1/workflows/{workflow_id}/views/{view_id} - Get a view
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/views/{view_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("view_id" = Uuid, Path, description = "View ID")
    ),
    responses(
        (status = 200, description = "View found", body = WorkflowView),
        (status = 404, description = "View not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_view(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path((workflow_id, view_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<WorkflowView>> {
    Ok(Json(state.service.get_view(workflow_id, view_id).await?))
}

/// PATCH /v1/workflows/{workflow_id}/views/{view_id} - Rename a view
#[utoipa::path(
    patch,
    path = "/v1/workflows/{workflow_id}/views/{view_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("view_id" = Uuid, Path, description = "View ID")
    ),
    request_body = NameRequest,
    responses(
        (status = 200, description = "View renamed", body = WorkflowView),
        (status = 404, description = "View not found", body = ErrorResponse),
        (status = 409, description = "View referenced by a route", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn rename_view(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, view_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<NameRequest>,
) -> ApiResult<Json<WorkflowView>> {
    actor.require_admin()?;
    let view = state
        .service
        .rename_view(workflow_id, view_id, &req.name)
        .await?;
    Ok(Json(view))
}

/// DELETE /v1/workflows/{workflow_id}/views/{view_id} - Delete a view
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}/views/{view_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("view_id" = Uuid, Path, description = "View ID")
    ),
    responses(
        (status = 204, description = "View deleted"),
        (status = 404, description = "View not found", body = ErrorResponse),
        (status = 409, description = "View referenced by a route", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn delete_view(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, view_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    actor.require_admin()?;
    state.service.delete_view(workflow_id, view_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================
// States
// ============================================

/// POST /v1/workflows/{workflow_id}/states - Add a state
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/states",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = NameRequest,
    responses(
        (status = 201, description = "State created", body = WorkflowState),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn create_state(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<NameRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowState>)> {
    actor.require_admin()?;
    let created = state.service.create_state(workflow_id, &req.name).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /v1/workflows/{workflow_id}/states - List states in creation order
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/states",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "List of states", body = ListResponse<WorkflowState>),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn list_states(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<WorkflowState>>> {
    Ok(Json(ListResponse::new(
        state.service.list_states(workflow_id).await?,
    )))
}

/// GET /v1/workflows/{workflow_id}/states/{state_id} - Get a state
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/states/{state_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("state_id" = Uuid, Path, description = "State ID")
    ),
    responses(
        (status = 200, description = "State found", body = WorkflowState),
        (status = 404, description = "State not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_state(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path((workflow_id, state_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<WorkflowState>> {
    Ok(Json(state.service.get_state(workflow_id, state_id).await?))
}

/// PATCH /v1/workflows/{workflow_id}/states/{state_id} - Rename a state
#[utoipa::path(
    patch,
    path = "/v1/workflows/{workflow_id}/states/{state_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("state_id" = Uuid, Path, description = "State ID")
    ),
    request_body = NameRequest,
    responses(
        (status = 200, description = "State renamed", body = WorkflowState),
        (status = 404, description = "State not found", body = ErrorResponse),
        (status = 409, description = "State referenced by a route", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn rename_state(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, state_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<NameRequest>,
) -> ApiResult<Json<WorkflowState>> {
    actor.require_admin()?;
    let renamed = state
        .service
        .rename_state(workflow_id, state_id, &req.name)
        .await?;
    Ok(Json(renamed))
}

/// DELETE /v1/workflows/{workflow_id}/states/{state_id} - Delete a state
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}/states/{state_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("state_id" = Uuid, Path, description = "State ID")
    ),
    responses(
        (status = 204, description = "State deleted"),
        (status = 404, description = "State not found", body = ErrorResponse),
        (status = 409, description = "State referenced by a route", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn delete_state(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, state_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    actor.require_admin()?;
    state.service.delete_state(workflow_id, state_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
