// Workflow catalog service: workflows, views and states

use std::sync::Arc;
use stepflow_core::workflow::validate_name;
use stepflow_core::{EngineError, Result, Workflow, WorkflowState, WorkflowView};
use stepflow_storage::{NewWorkflow, WorkflowStore};
use uuid::Uuid;

use crate::api::workflows::CreateWorkflowRequest;

pub struct WorkflowService {
    store: Arc<dyn WorkflowStore>,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, req: CreateWorkflowRequest) -> Result<Workflow> {
        validate_name("workflow", &req.name)?;
        let workflow = self
            .store
            .create_workflow(NewWorkflow {
                name: req.name,
                description: req.description,
                subject_kind: req.subject_kind,
            })
            .await?;

        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "created workflow");
        Ok(workflow)
    }

    pub async fn get(&self, id: Uuid) -> Result<Workflow> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Workflow>> {
        Ok(self.store.list_workflows().await?)
    }

    /// Delete a workflow with its views, states and routes.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_workflow(id).await? {
            return Err(EngineError::WorkflowNotFound(id));
        }
        tracing::info!(workflow_id = %id, "deleted workflow");
        Ok(())
    }

    // ============================================
    // Views
    // ============================================

    pub async fn create_view(&self, workflow_id: Uuid, name: &str) -> Result<WorkflowView> {
        validate_name("view", name)?;
        Ok(self.store.create_view(workflow_id, name).await?)
    }

    pub async fn list_views(&self, workflow_id: Uuid) -> Result<Vec<WorkflowView>> {
        self.get(workflow_id).await?;
        Ok(self.store.list_views(workflow_id).await?)
    }

    pub async fn get_view(&self, workflow_id: Uuid, view_id: Uuid) -> Result<WorkflowView> {
        self.owned_view(workflow_id, view_id).await
    }

    pub async fn rename_view(
        &self,
        workflow_id: Uuid,
        view_id: Uuid,
        name: &str,
    ) -> Result<WorkflowView> {
        validate_name("view", name)?;
        self.owned_view(workflow_id, view_id).await?;
        self.store
            .rename_view(view_id, name)
            .await?
            .ok_or_else(|| view_not_found(workflow_id, view_id))
    }

    pub async fn delete_view(&self, workflow_id: Uuid, view_id: Uuid) -> Result<()> {
        self.owned_view(workflow_id, view_id).await?;
        if !self.store.delete_view(view_id).await? {
            return Err(view_not_found(workflow_id, view_id));
        }
        Ok(())
    }

    async fn owned_view(&self, workflow_id: Uuid, view_id: Uuid) -> Result<WorkflowView> {
        self.store
            .get_view(view_id)
            .await?
            .filter(|v| v.workflow_id == workflow_id)
            .ok_or_else(|| view_not_found(workflow_id, view_id))
    }

    // ============================================
    // States
    // ============================================

    pub async fn create_state(&self, workflow_id: Uuid, name: &str) -> Result<WorkflowState> {
        validate_name("state", name)?;
        Ok(self.store.create_state(workflow_id, name).await?)
    }

    pub async fn list_states(&self, workflow_id: Uuid) -> Result<Vec<WorkflowState>> {
        self.get(workflow_id).await?;
        Ok(self.store.list_states(workflow_id).await?)
    }

    pub async fn get_state(&self, workflow_id: Uuid, state_id: Uuid) -> Result<WorkflowState> {
        self.owned_state(workflow_id, state_id).await
    }

    pub async fn rename_state(
        &self,
        workflow_id: Uuid,
        state_id: Uuid,
        name: &str,
    ) -> Result<WorkflowState> {
        validate_name("state", name)?;
        self.owned_state(workflow_id, state_id).await?;
        self.store
            .rename_state(state_id, name)
            .await?
            .ok_or_else(|| state_not_found(workflow_id, state_id))
    }

    pub async fn delete_state(&self, workflow_id: Uuid, state_id: Uuid) -> Result<()> {
        self.owned_state(workflow_id, state_id).await?;
        if !self.store.delete_state(state_id).await? {
            return Err(state_not_found(workflow_id, state_id));
        }
        Ok(())
    }

    async fn owned_state(&self, workflow_id: Uuid, state_id: Uuid) -> Result<WorkflowState> {
        self.store
            .get_state(state_id)
            .await?
            .filter(|s| s.workflow_id == workflow_id)
            .ok_or_else(|| state_not_found(workflow_id, state_id))
    }
}

fn view_not_found(workflow_id: Uuid, view_id: Uuid) -> EngineError {
    EngineError::ViewNotFound {
        workflow_id,
        name: view_id.to_string(),
    }
}

fn state_not_found(workflow_id: Uuid, state_id: Uuid) -> EngineError {
    EngineError::StateNotFound {
        workflow_id,
        name: state_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_storage::InMemoryWorkflowStore;

    fn service() -> WorkflowService {
        WorkflowService::new(Arc::new(InMemoryWorkflowStore::new()))
    }

    fn request(name: &str) -> CreateWorkflowRequest {
        CreateWorkflowRequest {
            name: name.to_string(),
            description: None,
            subject_kind: Some("job_application".into()),
        }
    }

    #[tokio::test]
    async fn test_workflow_names_are_unique() {
        let service = service();
        service.create(request("recruitment")).await.unwrap();

        let err = service.create(request("recruitment")).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName { kind: "workflow", .. }));

        let err = service.create(request("  ")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_view_belongs_to_workflow() {
        let service = service();
        let w1 = service.create(request("w1")).await.unwrap();
        let w2 = service.create(request("w2")).await.unwrap();
        let view = service.create_view(w1.id, "A").await.unwrap();

        let err = service.delete_view(w2.id, view.id).await.unwrap_err();
        assert!(matches!(err, EngineError::ViewNotFound { .. }));

        let renamed = service.rename_view(w1.id, view.id, "B").await.unwrap();
        assert_eq!(renamed.name, "B");
        service.delete_view(w1.id, view.id).await.unwrap();
        assert!(service.list_views(w1.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_states_listed_in_creation_order() {
        let service = service();
        let wf = service.create(request("w")).await.unwrap();
        service.create_state(wf.id, "GO").await.unwrap();
        service.create_state(wf.id, "DONE").await.unwrap();

        let names: Vec<_> = service
            .list_states(wf.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["GO", "DONE"]);

        let err = service.list_states(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_workflow() {
        let err = service().delete(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }
}
