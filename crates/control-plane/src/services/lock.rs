// Advisory edit lock on instances
//
// Decision: acquire never steals; the caller learns who holds the lock instead
// Decision: locks never expire, so administrators get an explicit force release
// The lock is a courtesy signal and does not gate transitions.

use std::sync::Arc;
use stepflow_core::telemetry::attrs;
use stepflow_core::{Actor, ActorId, EngineError, LockOutcome, LockStatus, Result};
use stepflow_storage::WorkflowStore;
use tracing::Instrument;
use uuid::Uuid;

pub struct LockService {
    store: Arc<dyn WorkflowStore>,
}

impl LockService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn acquire(&self, instance_id: Uuid, actor: &Actor) -> Result<LockOutcome> {
        let span = tracing::info_span!(
            "stepflow.acquire_lock",
            "stepflow.operation" = attrs::operation::ACQUIRE_LOCK,
            instance_id = %instance_id,
            actor_id = %actor.id,
        );

        let outcome = self
            .store
            .acquire_lock(instance_id, &actor.id)
            .instrument(span.clone())
            .await?;
        span.in_scope(|| tracing::debug!(?outcome, "lock acquire"));
        Ok(outcome)
    }

    /// Release the lock. Only the current holder may do so.
    pub async fn release(&self, instance_id: Uuid, actor: &Actor) -> Result<()> {
        let span = tracing::info_span!(
            "stepflow.release_lock",
            "stepflow.operation" = attrs::operation::RELEASE_LOCK,
            instance_id = %instance_id,
            actor_id = %actor.id,
        );

        let released = self
            .store
            .release_lock(instance_id, &actor.id)
            .instrument(span.clone())
            .await?;
        if !released {
            return Err(EngineError::LockConflict {
                instance_id,
                actor_id: actor.id.clone(),
            });
        }
        span.in_scope(|| tracing::debug!("lock released"));
        Ok(())
    }

    /// Clear the lock whoever holds it. Returns the previous holder.
    pub async fn force_release(&self, instance_id: Uuid) -> Result<Option<ActorId>> {
        let previous = self.store.force_release_lock(instance_id).await?;
        if let Some(holder) = &previous {
            tracing::warn!(%instance_id, %holder, "lock force-released");
        }
        Ok(previous)
    }

    pub async fn get(&self, instance_id: Uuid) -> Result<LockStatus> {
        let holder = self.store.get_lock(instance_id).await?;
        Ok(LockStatus {
            instance_id,
            holder,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_core::NewRoute;
    use stepflow_storage::{InMemoryWorkflowStore, NewWorkflow, StartRecord};

    async fn locked_instance() -> (LockService, Uuid) {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let wf = store
            .create_workflow(NewWorkflow {
                name: "w".into(),
                description: None,
                subject_kind: None,
            })
            .await
            .unwrap();
        let route = store
            .create_route(wf.id, &NewRoute::new("START", "GO", "A").as_start())
            .await
            .unwrap();
        let instance = store
            .start_instance(StartRecord {
                workflow_id: wf.id,
                subject_id: "s".into(),
                payload: None,
                route,
                actor_id: "u1".into(),
            })
            .await
            .unwrap();
        (LockService::new(store), instance.id)
    }

    #[tokio::test]
    async fn test_release_by_non_holder_conflicts() {
        let (locks, id) = locked_instance().await;
        let alice = Actor::new("u1");
        let bob = Actor::new("u2");

        assert_eq!(locks.acquire(id, &alice).await.unwrap(), LockOutcome::Acquired);

        let err = locks.release(id, &bob).await.unwrap_err();
        assert!(matches!(err, EngineError::LockConflict { .. }));
        assert_eq!(locks.get(id).await.unwrap().holder.as_deref(), Some("u1"));

        locks.release(id, &alice).await.unwrap();
        assert!(locks.get(id).await.unwrap().holder.is_none());
    }

    #[tokio::test]
    async fn test_release_unlocked_conflicts() {
        let (locks, id) = locked_instance().await;
        let err = locks.release(id, &Actor::new("u1")).await.unwrap_err();
        assert!(matches!(err, EngineError::LockConflict { .. }));
    }

    #[tokio::test]
    async fn test_force_release() {
        let (locks, id) = locked_instance().await;
        locks.acquire(id, &Actor::new("u1")).await.unwrap();

        let outcome = locks.acquire(id, &Actor::new("u2")).await.unwrap();
        assert!(!outcome.is_held_by_caller());

        assert_eq!(locks.force_release(id).await.unwrap().as_deref(), Some("u1"));
        assert_eq!(
            locks.acquire(id, &Actor::new("u2")).await.unwrap(),
            LockOutcome::Acquired
        );
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let (locks, _) = locked_instance().await;
        let err = locks.get(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::InstanceNotFound(_)));
    }
}
