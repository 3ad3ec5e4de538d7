// Route table HTTP routes

use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use stepflow_core::{NewRoute, Route, RouteUpdate};
use utoipa::IntoParams;
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};
use crate::auth::{AuthActor, AuthState};
use crate::services::RouteService;

/// Query for resolving the edge leaving a view
#[derive(Debug, Deserialize, IntoParams)]
pub struct ResolveQuery {
    /// View the action is submitted at.
    pub view: String,
    /// Outcome chosen at the view.
    pub state: String,
}

/// App state for route table routes
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RouteService>,
    pub auth: AuthState,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Create route table routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/workflows/:workflow_id/routes",
            post(create_route).get(list_routes),
        )
        .route("/v1/workflows/:workflow_id/routes/start", get(get_start_route))
        .route("/v1/workflows/:workflow_id/routes/resolve", get(resolve_route))
        .route(
            "/v1/workflows/:workflow_id/routes/:route_id",
            get(get_route).patch(update_route).delete(delete_route),
        )
        .with_state(state)
}

/// POST /v1/workflows/{workflow_id}/routes - Create a route
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/routes",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = NewRoute,
    responses(
        (status = 201, description = "Route created", body = Route),
        (status = 404, description = "Workflow, view or state not found", body = ErrorResponse),
        (status = 409, description = "A route already leaves this view with this state", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn create_route(
    State(state): State<AppState>,
    actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
    Json(req): Json<NewRoute>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    actor.require_admin()?;
    let route = state.service.create(workflow_id, req).await?;
    Ok((StatusCode::CREATED, Json(route)))
}

/// GET /v1/workflows/{workflow_id}/routes - List routes in creation order
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/routes",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "List of routes", body = ListResponse<Route>),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn list_routes(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<Route>>> {
    Ok(Json(ListResponse::new(state.service.list(workflow_id).await?)))
}

/// GET /v1/workflows/{workflow_id}/routes/start - The workflow's start route
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/routes/start",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Start route", body = Route),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 500, description = "Workflow has no start route", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_start_route(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Route>> {
    Ok(Json(state.service.find_start(workflow_id).await?))
}

/// GET /v1/workflows/{workflow_id}/routes/resolve - Route leaving a view with a state
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/routes/resolve",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID"), ResolveQuery),
    responses(
        (status = 200, description = "Matching route", body = Route),
        (status = 404, description = "No route matches", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn resolve_route(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path(workflow_id): Path<Uuid>,
    Query(query): Query<ResolveQuery>,
) -> ApiResult<Json<Route>> {
    let route = state
        .service
        .find(workflow_id, &query.view, &query.state)
        .await?;
    Ok(Json(route))
}

/// GET /v1/workflows/{workflow_id}/routes/{route_id} - Get a route
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}/routes/{route_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("route_id" = Uuid, Path, description = "Route ID")
    ),
    responses(
        (status = 200, description = "Route found", body = Route),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn get_route(
    State(state): State<AppState>,
    _actor: AuthActor,
    Path((workflow_id, route_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Route>> {
    Ok(Json(state.service.get(workflow_id, route_id).await?))
}

/// PATCH /v1/workflows/{workflow_id}/routes/{route_id} - Update a route
#[utoipa::path(
    patch,
    path = "/v1/workflows/{workflow_id}/routes/{route_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("route_id" = Uuid, Path, description = "Route ID")
    ),
    request_body = RouteUpdate,
    responses(
        (status = 200, description = "Route updated", body = Route),
        (status = 404, description = "Route not found", body = ErrorResponse),
        (status = 409, description = "Update collides with another route", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn update_route(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, route_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RouteUpdate>,
) -> ApiResult<Json<Route>> {
    actor.require_admin()?;
    let route = state.service.update(workflow_id, route_id, req).await?;
    Ok(Json(route))
}

/// DELETE /v1/workflows/{workflow_id}/routes/{route_id} - Delete a route
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}/routes/{route_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("route_id" = Uuid, Path, description = "Route ID")
    ),
    responses(
        (status = 204, description = "Route deleted"),
        (status = 404, description = "Route not found", body = ErrorResponse)
    ),
    tag = "routes"
)]
pub async fn delete_route(
    State(state): State<AppState>,
    actor: AuthActor,
    Path((workflow_id, route_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    actor.require_admin()?;
    state.service.delete(workflow_id, route_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
