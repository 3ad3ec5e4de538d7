//! WorkflowStore trait definition

use async_trait::async_trait;
use stepflow_core::{
    ActorId, EngineError, FileRef, Instance, InstancePredicate, LockOutcome, NewRoute, Payload,
    Route, RouteUpdate, TrailEntry, Workflow, WorkflowState, WorkflowView,
};
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// Unique name constraint (workflow name, view/state name per workflow)
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: &'static str, name: String },

    /// (workflow, view, state) already has a route
    #[error("route already exists for view '{view}' and state '{state}'")]
    DuplicateRoute { view: String, state: String },

    /// Delete or rename refused because other records depend on the target
    #[error("{0}")]
    InUse(String),

    /// Optimistic concurrency check failed
    #[error("instance {instance_id} version conflict: expected {expected}, got {actual}")]
    VersionConflict {
        instance_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// The instance no longer awaits the view the transition was submitted at
    #[error("instance {instance_id} awaits view '{expected}', got '{submitted}'")]
    ViewMismatch {
        instance_id: Uuid,
        expected: String,
        submitted: String,
    },

    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(id) => EngineError::WorkflowNotFound(id),
            StoreError::InstanceNotFound(id) => EngineError::InstanceNotFound(id),
            StoreError::Duplicate { kind, name } => EngineError::DuplicateName { kind, name },
            StoreError::DuplicateRoute { view, state } => {
                EngineError::DuplicateRoute { view, state }
            }
            StoreError::InUse(msg) => EngineError::InUse(msg),
            StoreError::VersionConflict {
                instance_id,
                expected,
                actual,
            } => EngineError::Conflict {
                instance_id,
                expected,
                actual,
            },
            StoreError::ViewMismatch {
                expected,
                submitted,
                ..
            } => EngineError::ViewMismatch {
                expected,
                submitted,
            },
            StoreError::Database(msg) => EngineError::Storage(msg),
        }
    }
}

/// Input for creating a workflow
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub subject_kind: Option<String>,
}

/// Everything `start` writes, applied as one unit.
#[derive(Debug, Clone)]
pub struct StartRecord {
    pub workflow_id: Uuid,
    pub subject_id: String,
    pub payload: Option<Payload>,
    /// Resolved start route of the workflow
    pub route: Route,
    pub actor_id: ActorId,
}

/// Everything `transition` writes, applied as one unit.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub instance_id: Uuid,
    /// When set, the write is rejected unless the instance is at this version
    pub expected_version: Option<i64>,
    /// When set, the write is rejected unless the instance awaits this view
    pub expected_view: Option<String>,
    /// Route selected by the submitted (view, state)
    pub route: Route,
    pub actor_id: ActorId,
    pub comment: Option<String>,
    pub payload_patch: Option<Payload>,
    pub files: Vec<FileRef>,
}

/// Persistence for workflows, route graphs, instances and trails.
///
/// Every method is atomic: compound writes (start, transition, start-route
/// changes, cascading deletes) either fully commit or leave no trace.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflows
    // =========================================================================

    async fn create_workflow(&self, input: NewWorkflow) -> Result<Workflow, StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError>;

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Delete a workflow with its views, states and routes.
    /// Fails with `InUse` while instances of the workflow exist.
    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError>;

    // =========================================================================
    // Views and states
    // =========================================================================

    async fn create_view(&self, workflow_id: Uuid, name: &str) -> Result<WorkflowView, StoreError>;

    async fn get_view(&self, id: Uuid) -> Result<Option<WorkflowView>, StoreError>;

    async fn list_views(&self, workflow_id: Uuid) -> Result<Vec<WorkflowView>, StoreError>;

    /// Rename a view. Fails with `InUse` if a route references the old name.
    async fn rename_view(&self, id: Uuid, name: &str) -> Result<Option<WorkflowView>, StoreError>;

    /// Fails with `InUse` if a route references the view.
    async fn delete_view(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn create_state(&self, workflow_id: Uuid, name: &str)
        -> Result<WorkflowState, StoreError>;

    async fn get_state(&self, id: Uuid) -> Result<Option<WorkflowState>, StoreError>;

    async fn list_states(&self, workflow_id: Uuid) -> Result<Vec<WorkflowState>, StoreError>;

    async fn rename_state(&self, id: Uuid, name: &str)
        -> Result<Option<WorkflowState>, StoreError>;

    async fn delete_state(&self, id: Uuid) -> Result<bool, StoreError>;

    // =========================================================================
    // Routes
    // =========================================================================

    /// Insert a route. With `start_sign`, clears the flag on every other
    /// route of the same workflow in the same write.
    async fn create_route(&self, workflow_id: Uuid, input: &NewRoute)
        -> Result<Route, StoreError>;

    async fn get_route(&self, id: Uuid) -> Result<Option<Route>, StoreError>;

    async fn find_route(
        &self,
        workflow_id: Uuid,
        view: &str,
        state: &str,
    ) -> Result<Option<Route>, StoreError>;

    async fn find_start_route(&self, workflow_id: Uuid) -> Result<Option<Route>, StoreError>;

    async fn list_routes(&self, workflow_id: Uuid) -> Result<Vec<Route>, StoreError>;

    /// Update a route. Setting `start_sign` re-applies the single-holder rule.
    async fn update_route(&self, id: Uuid, update: &RouteUpdate)
        -> Result<Option<Route>, StoreError>;

    async fn delete_route(&self, id: Uuid) -> Result<bool, StoreError>;

    // =========================================================================
    // Instances
    // =========================================================================

    /// Create an instance from its start route together with the first trail entry.
    async fn start_instance(&self, record: StartRecord) -> Result<Instance, StoreError>;

    /// Append a trail entry and move the instance, in one write.
    async fn apply_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<(Instance, TrailEntry), StoreError>;

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError>;

    /// Instances matching the predicate, newest first.
    async fn list_instances(
        &self,
        predicate: &InstancePredicate,
    ) -> Result<Vec<Instance>, StoreError>;

    /// Delete an instance and its trail.
    async fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Trail entries ordered by creation time (insertion order breaks ties).
    async fn list_trail(&self, instance_id: Uuid) -> Result<Vec<TrailEntry>, StoreError>;

    // =========================================================================
    // Advisory lock
    // =========================================================================

    /// Take the lock if free. Never steals a lock held by someone else.
    async fn acquire_lock(&self, instance_id: Uuid, actor_id: &str)
        -> Result<LockOutcome, StoreError>;

    /// Clear the lock if `actor_id` holds it. Returns false otherwise.
    async fn release_lock(&self, instance_id: Uuid, actor_id: &str) -> Result<bool, StoreError>;

    /// Clear the lock whoever holds it. Returns the previous holder.
    async fn force_release_lock(&self, instance_id: Uuid)
        -> Result<Option<ActorId>, StoreError>;

    async fn get_lock(&self, instance_id: Uuid) -> Result<Option<ActorId>, StoreError>;
}
