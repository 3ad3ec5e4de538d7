// Stepflow Core
//
// Domain types for the approval-workflow engine, shared by storage and
// the control-plane:
// - Workflow catalog: workflows, views (steps) and states (outcomes)
// - Route graph: (view, state) -> (next view, next role) edges
// - Instances and their append-only trail
// - Visibility predicates consumed by an external authorization layer
// - Collaborator traits for identity, files, roles and subjects

pub mod collaborators;
pub mod config;
pub mod error;
pub mod instance;
pub mod route;
pub mod telemetry;
pub mod visibility;
pub mod workflow;

pub use collaborators::{
    Actor, ActorResolver, DirectoryActor, DirectoryFile, FileStore, InMemoryFileStore,
    OpenSubjects, RoleDirectory, StaticDirectory, SubjectProvider, SubjectRegistry,
    SubjectSummary,
};
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use instance::{
    merge_payload, FileRef, Instance, LockOutcome, LockStatus, Payload, TrailEntry,
};
pub use route::{NewRoute, Route, RouteUpdate};
pub use visibility::{CustomPredicate, InstancePredicate};
pub use workflow::{Workflow, WorkflowState, WorkflowView};

/// Identifier of an actor (user) as issued by the external identity layer.
pub type ActorId = String;

/// Identifier of a role as issued by the external role directory.
pub type RoleId = String;
