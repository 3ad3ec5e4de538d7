// Stepflow Storage
//
// Persistence layer for the workflow engine.
// Decision: One trait, two backends; the control-plane picks one at startup
// Decision: Store methods are the unit of atomicity (start, transition,
//           start-route swaps, cascading deletes)

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryWorkflowStore;
pub use postgres::PostgresWorkflowStore;
pub use store::{NewWorkflow, StartRecord, StoreError, TransitionRecord, WorkflowStore};
