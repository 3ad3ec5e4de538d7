// OpenAPI specification generation
//
// This module defines the OpenAPI spec for the Stepflow API.
// It can be used by both the main API server (for Swagger UI)
// and the export-openapi binary (for static spec generation).

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use crate::services::{ActorRef, InstanceDetails, StartInstance, TrailEntryDetails, TransitionInput};
use stepflow_core::{
    FileRef, Instance, LockOutcome, LockStatus, NewRoute, Route, RouteUpdate, SubjectSummary,
    TrailEntry, Workflow, WorkflowState, WorkflowView,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Stepflow API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::workflows::create_workflow,
        api::workflows::list_workflows,
        api::workflows::get_workflow,
        api::workflows::delete_workflow,
        api::workflows::create_view,
        api::workflows::list_views,
        api::workflows::get_view,
        api::workflows::rename_view,
        api::workflows::delete_view,
        api::workflows::create_state,
        api::workflows::list_states,
        api::workflows::get_state,
        api::workflows::rename_state,
        api::workflows::delete_state,
        api::routes::create_route,
        api::routes::list_routes,
        api::routes::get_start_route,
        api::routes::resolve_route,
        api::routes::get_route,
        api::routes::update_route,
        api::routes::delete_route,
        api::instances::start_instance,
        api::instances::list_instances,
        api::instances::get_instance,
        api::instances::delete_instance,
        api::instances::transition,
        api::instances::get_trail,
        api::locks::get_lock,
        api::locks::acquire_lock,
        api::locks::release_lock,
    ),
    components(
        schemas(
            ErrorResponse,
            // Catalog
            Workflow, WorkflowView, WorkflowState,
            api::workflows::CreateWorkflowRequest, api::workflows::NameRequest,
            ListResponse<Workflow>,
            ListResponse<WorkflowView>,
            ListResponse<WorkflowState>,
            // Routes
            Route, NewRoute, RouteUpdate,
            ListResponse<Route>,
            // Instances
            Instance, InstanceDetails, ActorRef, SubjectSummary,
            StartInstance, TransitionInput,
            TrailEntry, TrailEntryDetails, FileRef,
            ListResponse<Instance>,
            ListResponse<TrailEntryDetails>,
            // Locks
            LockOutcome, LockStatus,
        )
    ),
    tags(
        (name = "workflows", description = "Workflow, view and state catalog endpoints"),
        (name = "routes", description = "Route table endpoints"),
        (name = "instances", description = "Instance lifecycle and trail endpoints"),
        (name = "locks", description = "Advisory edit lock endpoints")
    ),
    info(
        title = "Stepflow API",
        version = "0.1.0",
        description = "API for defining workflows and moving instances through them",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate the OpenAPI spec as a pretty-printed JSON string
    pub fn to_json() -> Result<String, serde_json::Error> {
        Self::openapi().to_pretty_json()
    }
}
