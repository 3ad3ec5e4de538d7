// Services layer for business logic
// Services own business logic and validation, calling storage directly

pub mod instance;
pub mod lock;
pub mod route;
pub mod workflow;

pub use instance::{
    ActorRef, InstanceDetails, InstanceService, StartInstance, TrailEntryDetails, TransitionInput,
};
pub use lock::LockService;
pub use route::RouteService;
pub use workflow::WorkflowService;

use std::sync::Arc;
use stepflow_core::{
    ActorResolver, EngineConfig, FileStore, InMemoryFileStore, RoleDirectory, StaticDirectory,
    SubjectRegistry,
};
use stepflow_storage::WorkflowStore;

/// External collaborators the engine reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub actors: Arc<dyn ActorResolver>,
    pub files: Arc<dyn FileStore>,
    pub roles: Arc<dyn RoleDirectory>,
    pub subjects: SubjectRegistry,
}

impl Collaborators {
    /// Identity and role names from a static directory, an empty in-memory
    /// file registry and permissive subjects.
    pub fn from_directory(directory: StaticDirectory) -> Self {
        let directory = Arc::new(directory);
        Self {
            actors: directory.clone(),
            files: Arc::new(InMemoryFileStore::new()),
            roles: directory,
            subjects: SubjectRegistry::new(),
        }
    }

    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn with_subjects(mut self, subjects: SubjectRegistry) -> Self {
        self.subjects = subjects;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::from_directory(StaticDirectory::default())
    }
}

/// Every service of the engine, wired over one store.
#[derive(Clone)]
pub struct Engine {
    pub workflows: Arc<WorkflowService>,
    pub routes: Arc<RouteService>,
    pub instances: Arc<InstanceService>,
    pub locks: Arc<LockService>,
    pub actors: Arc<dyn ActorResolver>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows: Arc::new(WorkflowService::new(store.clone())),
            routes: Arc::new(RouteService::new(store.clone())),
            instances: Arc::new(InstanceService::new(
                store.clone(),
                collaborators.clone(),
                config,
            )),
            locks: Arc::new(LockService::new(store)),
            actors: collaborators.actors,
        }
    }
}
