// Route table and resolver

use std::sync::Arc;
use stepflow_core::telemetry::attrs;
use stepflow_core::{EngineError, NewRoute, Result, Route, RouteUpdate};
use stepflow_storage::WorkflowStore;
use tracing::Instrument;
use uuid::Uuid;

pub struct RouteService {
    store: Arc<dyn WorkflowStore>,
}

impl RouteService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Create a route. With `start_sign`, the workflow's previous start
    /// route loses the flag in the same write.
    pub async fn create(&self, workflow_id: Uuid, input: NewRoute) -> Result<Route> {
        let span = tracing::info_span!(
            "stepflow.create_route",
            "stepflow.operation" = attrs::operation::CREATE_ROUTE,
            workflow_id = %workflow_id,
            view = %input.view,
            state = %input.state,
            start_sign = input.start_sign,
        );

        self.create_inner(workflow_id, input).instrument(span).await
    }

    async fn create_inner(&self, workflow_id: Uuid, input: NewRoute) -> Result<Route> {
        input.validate()?;
        self.require_workflow(workflow_id).await?;
        self.check_names(
            workflow_id,
            Some(&input.view),
            Some(&input.state),
            Some(&input.next_view),
        )
        .await?;

        let route = self.store.create_route(workflow_id, &input).await?;
        tracing::info!(route_id = %route.id, "created route");
        Ok(route)
    }

    pub async fn get(&self, workflow_id: Uuid, route_id: Uuid) -> Result<Route> {
        self.store
            .get_route(route_id)
            .await?
            .filter(|r| r.workflow_id == workflow_id)
            .ok_or_else(|| EngineError::RouteNotFound(route_id.to_string()))
    }

    /// Resolve the edge leaving `view` with outcome `state`.
    pub async fn find(&self, workflow_id: Uuid, view: &str, state: &str) -> Result<Route> {
        self.store
            .find_route(workflow_id, view, state)
            .await?
            .ok_or_else(|| EngineError::RouteNotFound(format!("({view}, {state})")))
    }

    /// The workflow's entry point. Missing means the workflow is misconfigured.
    pub async fn find_start(&self, workflow_id: Uuid) -> Result<Route> {
        self.require_workflow(workflow_id).await?;
        self.store
            .find_start_route(workflow_id)
            .await?
            .ok_or(EngineError::NoStartRoute(workflow_id))
    }

    pub async fn list(&self, workflow_id: Uuid) -> Result<Vec<Route>> {
        self.require_workflow(workflow_id).await?;
        Ok(self.store.list_routes(workflow_id).await?)
    }

    pub async fn update(
        &self,
        workflow_id: Uuid,
        route_id: Uuid,
        update: RouteUpdate,
    ) -> Result<Route> {
        let span = tracing::info_span!(
            "stepflow.update_route",
            "stepflow.operation" = attrs::operation::UPDATE_ROUTE,
            workflow_id = %workflow_id,
            route_id = %route_id,
        );

        self.update_inner(workflow_id, route_id, update)
            .instrument(span)
            .await
    }

    async fn update_inner(
        &self,
        workflow_id: Uuid,
        route_id: Uuid,
        update: RouteUpdate,
    ) -> Result<Route> {
        update.validate()?;
        self.get(workflow_id, route_id).await?;
        self.check_names(
            workflow_id,
            update.view.as_deref(),
            update.state.as_deref(),
            update.next_view.as_deref(),
        )
        .await?;

        let route = self
            .store
            .update_route(route_id, &update)
            .await?
            .ok_or_else(|| EngineError::RouteNotFound(route_id.to_string()))?;
        tracing::info!(start_sign = route.start_sign, "updated route");
        Ok(route)
    }

    pub async fn delete(&self, workflow_id: Uuid, route_id: Uuid) -> Result<()> {
        self.get(workflow_id, route_id).await?;
        if !self.store.delete_route(route_id).await? {
            return Err(EngineError::RouteNotFound(route_id.to_string()));
        }
        tracing::info!(%workflow_id, %route_id, "deleted route");
        Ok(())
    }

    async fn require_workflow(&self, workflow_id: Uuid) -> Result<()> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .map(|_| ())
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    /// Views and states named by a route must exist in its workflow.
    async fn check_names(
        &self,
        workflow_id: Uuid,
        view: Option<&str>,
        state: Option<&str>,
        next_view: Option<&str>,
    ) -> Result<()> {
        let views = self.store.list_views(workflow_id).await?;
        for name in [view, next_view].into_iter().flatten() {
            if !views.iter().any(|v| v.name == name) {
                return Err(EngineError::ViewNotFound {
                    workflow_id,
                    name: name.to_string(),
                });
            }
        }

        if let Some(name) = state {
            let states = self.store.list_states(workflow_id).await?;
            if !states.iter().any(|s| s.name == name) {
                return Err(EngineError::StateNotFound {
                    workflow_id,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}
