//! In-memory implementation of WorkflowStore for dev mode and tests
//!
//! All tables sit behind one lock, so every compound write (start,
//! transition, start-route swap, cascading delete) happens under a single
//! write guard and is atomic with respect to concurrent callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use stepflow_core::{
    merge_payload, ActorId, Instance, InstancePredicate, LockOutcome, NewRoute, Route,
    RouteUpdate, TrailEntry, Workflow, WorkflowState, WorkflowView,
};
use uuid::Uuid;

use super::store::*;

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, Workflow>,
    views: HashMap<Uuid, WorkflowView>,
    states: HashMap<Uuid, WorkflowState>,
    routes: HashMap<Uuid, Route>,
    instances: HashMap<Uuid, Instance>,
    // Trail per instance, in insertion order
    trail: HashMap<Uuid, Vec<TrailEntry>>,
}

impl Tables {
    fn require_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        if self.workflows.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::WorkflowNotFound(id))
        }
    }

    fn route_conflict(
        &self,
        workflow_id: Uuid,
        view: &str,
        state: &str,
        except: Option<Uuid>,
    ) -> bool {
        self.routes.values().any(|r| {
            r.workflow_id == workflow_id && r.matches(view, state) && Some(r.id) != except
        })
    }

    /// Clear the start sign on every route of the workflow except `keep`.
    fn clear_start_sign(&mut self, workflow_id: Uuid, keep: Uuid) {
        let now = Utc::now();
        for route in self.routes.values_mut() {
            if route.workflow_id == workflow_id && route.start_sign && route.id != keep {
                route.start_sign = false;
                route.updated_at = now;
            }
        }
    }

    fn view_in_use(&self, workflow_id: Uuid, name: &str) -> bool {
        self.routes
            .values()
            .any(|r| r.workflow_id == workflow_id && (r.view == name || r.next_view == name))
    }

    fn state_in_use(&self, workflow_id: Uuid, name: &str) -> bool {
        self.routes
            .values()
            .any(|r| r.workflow_id == workflow_id && r.state == name)
    }
}

/// In-memory implementation of WorkflowStore
///
/// Provides the same semantics as the PostgreSQL implementation.
/// All data is lost on restart.
///
/// # Example
///
/// ```
/// use stepflow_storage::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert_eq!(store.instance_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    tables: RwLock<Tables>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.tables.read().instances.len()
    }

    /// Get the number of trail entries across all instances
    pub fn trail_count(&self) -> usize {
        self.tables.read().trail.values().map(Vec::len).sum()
    }
}

fn sorted_asc<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    // ============================================
    // Workflows
    // ============================================

    async fn create_workflow(&self, input: NewWorkflow) -> Result<Workflow, StoreError> {
        let mut tables = self.tables.write();
        if tables.workflows.values().any(|w| w.name == input.name) {
            return Err(StoreError::Duplicate {
                kind: "workflow",
                name: input.name,
            });
        }
        let workflow = Workflow {
            id: Uuid::now_v7(),
            name: input.name,
            description: input.description,
            subject_kind: input.subject_kind,
            created_at: Utc::now(),
        };
        tables.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.tables.read().workflows.get(&id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let tables = self.tables.read();
        let mut result: Vec<_> = tables.workflows.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        if !tables.workflows.contains_key(&id) {
            return Ok(false);
        }
        if tables.instances.values().any(|i| i.workflow_id == id) {
            return Err(StoreError::InUse(format!(
                "workflow {id} still has instances"
            )));
        }
        tables.views.retain(|_, v| v.workflow_id != id);
        tables.states.retain(|_, s| s.workflow_id != id);
        tables.routes.retain(|_, r| r.workflow_id != id);
        tables.workflows.remove(&id);
        Ok(true)
    }

    // ============================================
    // Views
    // ============================================

    async fn create_view(
        &self,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<WorkflowView, StoreError> {
        let mut tables = self.tables.write();
        tables.require_workflow(workflow_id)?;
        if tables
            .views
            .values()
            .any(|v| v.workflow_id == workflow_id && v.name == name)
        {
            return Err(StoreError::Duplicate {
                kind: "view",
                name: name.to_string(),
            });
        }
        let view = WorkflowView {
            id: Uuid::now_v7(),
            workflow_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.views.insert(view.id, view.clone());
        Ok(view)
    }

    async fn get_view(&self, id: Uuid) -> Result<Option<WorkflowView>, StoreError> {
        Ok(self.tables.read().views.get(&id).cloned())
    }

    async fn list_views(&self, workflow_id: Uuid) -> Result<Vec<WorkflowView>, StoreError> {
        let tables = self.tables.read();
        let views = tables
            .views
            .values()
            .filter(|v| v.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_asc(views, |v| (v.created_at, v.id)))
    }

    async fn rename_view(&self, id: Uuid, name: &str) -> Result<Option<WorkflowView>, StoreError> {
        let mut tables = self.tables.write();
        let Some(current) = tables.views.get(&id).cloned() else {
            return Ok(None);
        };
        if current.name == name {
            return Ok(Some(current));
        }
        if tables
            .views
            .values()
            .any(|v| v.workflow_id == current.workflow_id && v.name == name)
        {
            return Err(StoreError::Duplicate {
                kind: "view",
                name: name.to_string(),
            });
        }
        if tables.view_in_use(current.workflow_id, &current.name) {
            return Err(StoreError::InUse(format!(
                "view '{}' is referenced by routes",
                current.name
            )));
        }
        let view = tables.views.get_mut(&id).map(|v| {
            v.name = name.to_string();
            v.clone()
        });
        Ok(view)
    }

    async fn delete_view(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let Some(view) = tables.views.get(&id).cloned() else {
            return Ok(false);
        };
        if tables.view_in_use(view.workflow_id, &view.name) {
            return Err(StoreError::InUse(format!(
                "view '{}' is referenced by routes",
                view.name
            )));
        }
        tables.views.remove(&id);
        Ok(true)
    }

    // ============================================
    // States
    // ============================================

    async fn create_state(
        &self,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<WorkflowState, StoreError> {
        let mut tables = self.tables.write();
        tables.require_workflow(workflow_id)?;
        if tables
            .states
            .values()
            .any(|s| s.workflow_id == workflow_id && s.name == name)
        {
            return Err(StoreError::Duplicate {
                kind: "state",
                name: name.to_string(),
            });
        }
        let state = WorkflowState {
            id: Uuid::now_v7(),
            workflow_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        tables.states.insert(state.id, state.clone());
        Ok(state)
    }

    async fn get_state(&self, id: Uuid) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self.tables.read().states.get(&id).cloned())
    }

    async fn list_states(&self, workflow_id: Uuid) -> Result<Vec<WorkflowState>, StoreError> {
        let tables = self.tables.read();
        let states = tables
            .states
            .values()
            .filter(|s| s.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_asc(states, |s| (s.created_at, s.id)))
    }

    async fn rename_state(
        &self,
        id: Uuid,
        name: &str,
    ) -> Result<Option<WorkflowState>, StoreError> {
        let mut tables = self.tables.write();
        let Some(current) = tables.states.get(&id).cloned() else {
            return Ok(None);
        };
        if current.name == name {
            return Ok(Some(current));
        }
        if tables
            .states
            .values()
            .any(|s| s.workflow_id == current.workflow_id && s.name == name)
        {
            return Err(StoreError::Duplicate {
                kind: "state",
                name: name.to_string(),
            });
        }
        if tables.state_in_use(current.workflow_id, &current.name) {
            return Err(StoreError::InUse(format!(
                "state '{}' is referenced by routes",
                current.name
            )));
        }
        let state = tables.states.get_mut(&id).map(|s| {
            s.name = name.to_string();
            s.clone()
        });
        Ok(state)
    }

    async fn delete_state(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let Some(state) = tables.states.get(&id).cloned() else {
            return Ok(false);
        };
        if tables.state_in_use(state.workflow_id, &state.name) {
            return Err(StoreError::InUse(format!(
                "state '{}' is referenced by routes",
                state.name
            )));
        }
        tables.states.remove(&id);
        Ok(true)
    }

    // ============================================
    // Routes
    // ============================================

    async fn create_route(
        &self,
        workflow_id: Uuid,
        input: &NewRoute,
    ) -> Result<Route, StoreError> {
        let mut tables = self.tables.write();
        tables.require_workflow(workflow_id)?;
        if tables.route_conflict(workflow_id, &input.view, &input.state, None) {
            return Err(StoreError::DuplicateRoute {
                view: input.view.clone(),
                state: input.state.clone(),
            });
        }

        let now = Utc::now();
        let route = Route {
            id: Uuid::now_v7(),
            workflow_id,
            view: input.view.clone(),
            state: input.state.clone(),
            next_view: input.next_view.clone(),
            next_role_id: input.next_role_id.clone(),
            start_sign: input.start_sign,
            created_at: now,
            updated_at: now,
        };
        if route.start_sign {
            tables.clear_start_sign(workflow_id, route.id);
        }
        tables.routes.insert(route.id, route.clone());
        Ok(route)
    }

    async fn get_route(&self, id: Uuid) -> Result<Option<Route>, StoreError> {
        Ok(self.tables.read().routes.get(&id).cloned())
    }

    async fn find_route(
        &self,
        workflow_id: Uuid,
        view: &str,
        state: &str,
    ) -> Result<Option<Route>, StoreError> {
        Ok(self
            .tables
            .read()
            .routes
            .values()
            .find(|r| r.workflow_id == workflow_id && r.matches(view, state))
            .cloned())
    }

    async fn find_start_route(&self, workflow_id: Uuid) -> Result<Option<Route>, StoreError> {
        Ok(self
            .tables
            .read()
            .routes
            .values()
            .find(|r| r.workflow_id == workflow_id && r.start_sign)
            .cloned())
    }

    async fn list_routes(&self, workflow_id: Uuid) -> Result<Vec<Route>, StoreError> {
        let tables = self.tables.read();
        let routes = tables
            .routes
            .values()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect();
        Ok(sorted_asc(routes, |r| (r.created_at, r.id)))
    }

    async fn update_route(
        &self,
        id: Uuid,
        update: &RouteUpdate,
    ) -> Result<Option<Route>, StoreError> {
        let mut tables = self.tables.write();
        let Some(mut route) = tables.routes.get(&id).cloned() else {
            return Ok(None);
        };
        update.apply_to(&mut route);

        if tables.route_conflict(route.workflow_id, &route.view, &route.state, Some(id)) {
            return Err(StoreError::DuplicateRoute {
                view: route.view,
                state: route.state,
            });
        }
        if update.start_sign == Some(true) {
            tables.clear_start_sign(route.workflow_id, id);
        }
        route.updated_at = Utc::now();
        tables.routes.insert(id, route.clone());
        Ok(Some(route))
    }

    async fn delete_route(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().routes.remove(&id).is_some())
    }

    // ============================================
    // Instances
    // ============================================

    async fn start_instance(&self, record: StartRecord) -> Result<Instance, StoreError> {
        let mut tables = self.tables.write();
        tables.require_workflow(record.workflow_id)?;

        let now = Utc::now();
        let instance = Instance {
            id: Uuid::now_v7(),
            workflow_id: record.workflow_id,
            subject_id: record.subject_id,
            state: record.route.state.clone(),
            next_view: record.route.next_view.clone(),
            next_role_id: record.route.next_role_id.clone(),
            processed_by_user_ids: vec![record.actor_id.clone()],
            being_held_by_user_id: None,
            payload: record.payload,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let entry = TrailEntry {
            id: Uuid::now_v7(),
            instance_id: instance.id,
            view: record.route.view,
            state: record.route.state,
            next_view: record.route.next_view,
            next_role_id: record.route.next_role_id,
            processed_by_user_id: record.actor_id,
            comment: None,
            files: vec![],
            created_at: now,
        };

        tables.trail.insert(instance.id, vec![entry]);
        tables.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    async fn apply_transition(
        &self,
        record: TransitionRecord,
    ) -> Result<(Instance, TrailEntry), StoreError> {
        let mut tables = self.tables.write();
        let instance = tables
            .instances
            .get_mut(&record.instance_id)
            .ok_or(StoreError::InstanceNotFound(record.instance_id))?;

        if let Some(expected) = record.expected_version {
            if instance.version != expected {
                return Err(StoreError::VersionConflict {
                    instance_id: record.instance_id,
                    expected,
                    actual: instance.version,
                });
            }
        }
        if let Some(view) = record.expected_view {
            if instance.next_view != view {
                return Err(StoreError::ViewMismatch {
                    instance_id: record.instance_id,
                    expected: instance.next_view.clone(),
                    submitted: view,
                });
            }
        }

        let now = Utc::now();
        let route = record.route;
        instance.state = route.state.clone();
        instance.next_view = route.next_view.clone();
        instance.next_role_id = route.next_role_id.clone();
        instance.record_actor(&record.actor_id);
        instance.payload = merge_payload(instance.payload.take(), record.payload_patch.as_ref());
        instance.version += 1;
        instance.updated_at = now;
        let instance = instance.clone();

        let entry = TrailEntry {
            id: Uuid::now_v7(),
            instance_id: record.instance_id,
            view: route.view,
            state: route.state,
            next_view: route.next_view,
            next_role_id: route.next_role_id,
            processed_by_user_id: record.actor_id,
            comment: record.comment,
            files: record.files,
            created_at: now,
        };
        tables
            .trail
            .entry(record.instance_id)
            .or_default()
            .push(entry.clone());

        Ok((instance, entry))
    }

    async fn get_instance(&self, id: Uuid) -> Result<Option<Instance>, StoreError> {
        Ok(self.tables.read().instances.get(&id).cloned())
    }

    async fn list_instances(
        &self,
        predicate: &InstancePredicate,
    ) -> Result<Vec<Instance>, StoreError> {
        let tables = self.tables.read();
        let mut result: Vec<_> = tables
            .instances
            .values()
            .filter(|i| predicate.matches(i))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn delete_instance(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        tables.trail.remove(&id);
        Ok(tables.instances.remove(&id).is_some())
    }

    async fn list_trail(&self, instance_id: Uuid) -> Result<Vec<TrailEntry>, StoreError> {
        Ok(self
            .tables
            .read()
            .trail
            .get(&instance_id)
            .cloned()
            .unwrap_or_default())
    }

    // ============================================
    // Advisory lock
    // ============================================

    async fn acquire_lock(
        &self,
        instance_id: Uuid,
        actor_id: &str,
    ) -> Result<LockOutcome, StoreError> {
        let mut tables = self.tables.write();
        let instance = tables
            .instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        let outcome = match instance.being_held_by_user_id.as_deref() {
            None => {
                instance.being_held_by_user_id = Some(actor_id.to_string());
                LockOutcome::Acquired
            }
            Some(holder) if holder == actor_id => LockOutcome::AlreadyMine,
            Some(holder) => LockOutcome::HeldByOther {
                holder: holder.to_string(),
            },
        };
        Ok(outcome)
    }

    async fn release_lock(&self, instance_id: Uuid, actor_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let instance = tables
            .instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;

        if instance.is_held_by(actor_id) {
            instance.being_held_by_user_id = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn force_release_lock(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<ActorId>, StoreError> {
        let mut tables = self.tables.write();
        let instance = tables
            .instances
            .get_mut(&instance_id)
            .ok_or(StoreError::InstanceNotFound(instance_id))?;
        Ok(instance.being_held_by_user_id.take())
    }

    async fn get_lock(&self, instance_id: Uuid) -> Result<Option<ActorId>, StoreError> {
        self.tables
            .read()
            .instances
            .get(&instance_id)
            .map(|i| i.being_held_by_user_id.clone())
            .ok_or(StoreError::InstanceNotFound(instance_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::task::JoinSet;

    async fn workflow(store: &InMemoryWorkflowStore, name: &str) -> Workflow {
        store
            .create_workflow(NewWorkflow {
                name: name.to_string(),
                description: None,
                subject_kind: None,
            })
            .await
            .unwrap()
    }

    async fn started(store: &InMemoryWorkflowStore) -> (Workflow, Instance) {
        let wf = workflow(store, "recruitment").await;
        let start = store
            .create_route(wf.id, &NewRoute::new("START", "GO", "A").with_role("roleX").as_start())
            .await
            .unwrap();
        let instance = store
            .start_instance(StartRecord {
                workflow_id: wf.id,
                subject_id: "job-1".into(),
                payload: None,
                route: start,
                actor_id: "u1".into(),
            })
            .await
            .unwrap();
        (wf, instance)
    }

    #[tokio::test]
    async fn test_duplicate_route_rejected() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow(&store, "w").await;

        store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();
        let err = store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "B"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRoute { .. }));

        // Same pair in another workflow is fine
        let other = workflow(&store, "other").await;
        store
            .create_route(other.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_sign_is_scoped_to_workflow() {
        let store = InMemoryWorkflowStore::new();
        let w1 = workflow(&store, "w1").await;
        let w2 = workflow(&store, "w2").await;

        let w2_start = store
            .create_route(w2.id, &NewRoute::new("S", "GO", "A").as_start())
            .await
            .unwrap();
        let first = store
            .create_route(w1.id, &NewRoute::new("S", "GO", "A").as_start())
            .await
            .unwrap();
        let second = store
            .create_route(w1.id, &NewRoute::new("S", "SKIP", "B").as_start())
            .await
            .unwrap();

        let start = store.find_start_route(w1.id).await.unwrap().unwrap();
        assert_eq!(start.id, second.id);
        assert!(!store.get_route(first.id).await.unwrap().unwrap().start_sign);

        // The other workflow keeps its own entry point
        let start = store.find_start_route(w2.id).await.unwrap().unwrap();
        assert_eq!(start.id, w2_start.id);
    }

    #[tokio::test]
    async fn test_update_route_moves_start_sign() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow(&store, "w").await;
        let first = store
            .create_route(wf.id, &NewRoute::new("S", "GO", "A").as_start())
            .await
            .unwrap();
        let second = store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();

        let update = RouteUpdate {
            start_sign: Some(true),
            ..Default::default()
        };
        store.update_route(second.id, &update).await.unwrap();

        let starts: Vec<_> = store
            .list_routes(wf.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.start_sign)
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].id, second.id);
        assert!(!store.get_route(first.id).await.unwrap().unwrap().start_sign);
    }

    #[tokio::test]
    async fn test_update_route_rejects_collision() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow(&store, "w").await;
        store
            .create_route(wf.id, &NewRoute::new("A", "OK", "B"))
            .await
            .unwrap();
        let other = store
            .create_route(wf.id, &NewRoute::new("A", "NO", "C"))
            .await
            .unwrap();

        let update = RouteUpdate {
            state: Some("OK".into()),
            ..Default::default()
        };
        let err = store.update_route(other.id, &update).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateRoute { .. }));
        assert_eq!(store.get_route(other.id).await.unwrap().unwrap().state, "NO");
    }

    #[tokio::test]
    async fn test_start_writes_instance_and_one_trail_entry() {
        let store = InMemoryWorkflowStore::new();
        let (_, instance) = started(&store).await;

        assert_eq!(instance.next_view, "A");
        assert_eq!(instance.next_role_id.as_deref(), Some("roleX"));
        assert_eq!(instance.version, 1);

        let trail = store.list_trail(instance.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].view, "START");
        assert_eq!(trail[0].state, "GO");
        assert_eq!(trail[0].processed_by_user_id, "u1");
    }

    #[tokio::test]
    async fn test_transition_keeps_actor_set_unique() {
        let store = InMemoryWorkflowStore::new();
        let (wf, instance) = started(&store).await;
        let route = store
            .create_route(wf.id, &NewRoute::new("A", "REVIEW", "A").with_role("roleX"))
            .await
            .unwrap();

        for _ in 0..2 {
            store
                .apply_transition(TransitionRecord {
                    instance_id: instance.id,
                    expected_version: None,
                    expected_view: None,
                    route: route.clone(),
                    actor_id: "u2".into(),
                    comment: None,
                    payload_patch: None,
                    files: vec![],
                })
                .await
                .unwrap();
        }

        let instance = store.get_instance(instance.id).await.unwrap().unwrap();
        assert_eq!(instance.processed_by_user_ids, vec!["u1", "u2"]);
        assert_eq!(instance.version, 3);
        assert_eq!(store.list_trail(instance.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stale_version_leaves_no_trace() {
        let store = InMemoryWorkflowStore::new();
        let (wf, instance) = started(&store).await;
        let route = store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();

        let err = store
            .apply_transition(TransitionRecord {
                instance_id: instance.id,
                expected_version: Some(7),
                expected_view: None,
                route,
                actor_id: "u2".into(),
                comment: None,
                payload_patch: Some(json!({"k": 1}).as_object().cloned().unwrap()),
                files: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 7,
                actual: 1,
                ..
            }
        ));

        assert_eq!(store.get_instance(instance.id).await.unwrap().unwrap(), instance);
        assert_eq!(store.trail_count(), 1);
    }

    #[tokio::test]
    async fn test_lock_outcomes() {
        let store = InMemoryWorkflowStore::new();
        let (_, instance) = started(&store).await;

        assert_eq!(
            store.acquire_lock(instance.id, "u1").await.unwrap(),
            LockOutcome::Acquired
        );
        assert_eq!(
            store.acquire_lock(instance.id, "u1").await.unwrap(),
            LockOutcome::AlreadyMine
        );
        assert_eq!(
            store.acquire_lock(instance.id, "u2").await.unwrap(),
            LockOutcome::HeldByOther {
                holder: "u1".into()
            }
        );

        assert!(!store.release_lock(instance.id, "u2").await.unwrap());
        assert_eq!(store.get_lock(instance.id).await.unwrap().as_deref(), Some("u1"));
        assert!(store.release_lock(instance.id, "u1").await.unwrap());
        assert!(store.get_lock(instance.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expected_view_checked_inside_write() {
        let store = InMemoryWorkflowStore::new();
        let (wf, instance) = started(&store).await;
        let done = store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();
        let record = TransitionRecord {
            instance_id: instance.id,
            expected_version: None,
            expected_view: Some("A".into()),
            route: done,
            actor_id: "u2".into(),
            comment: None,
            payload_patch: None,
            files: vec![],
        };

        store.apply_transition(record.clone()).await.unwrap();
        let err = store.apply_transition(record).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ViewMismatch { ref expected, ref submitted, .. }
                if expected == "END" && submitted == "A"
        ));
        assert_eq!(store.list_trail(instance.id).await.unwrap().len(), 2);
        assert_eq!(store.get_instance(instance.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_transitions_keep_actor_set_unique() {
        const WRITERS: usize = 12;
        let store = Arc::new(InMemoryWorkflowStore::new());
        let (wf, instance) = started(&store).await;
        let review = store
            .create_route(wf.id, &NewRoute::new("A", "REVIEW", "A").with_role("roleX"))
            .await
            .unwrap();

        let instance_id = instance.id;
        let mut tasks = JoinSet::new();
        for i in 0..WRITERS {
            let store = store.clone();
            let route = review.clone();
            tasks.spawn(async move {
                store
                    .apply_transition(TransitionRecord {
                        instance_id,
                        expected_version: None,
                        expected_view: Some("A".into()),
                        route,
                        actor_id: format!("u{}", i % 3),
                        comment: None,
                        payload_patch: None,
                        files: vec![],
                    })
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        let instance = store.get_instance(instance_id).await.unwrap().unwrap();
        assert_eq!(instance.version, WRITERS as i64 + 1);
        assert_eq!(store.list_trail(instance_id).await.unwrap().len(), WRITERS + 1);

        let mut actors = instance.processed_by_user_ids.clone();
        assert_eq!(actors[0], "u1");
        actors.sort();
        assert_eq!(actors, vec!["u0", "u1", "u2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_one_winner() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let (_, instance) = started(&store).await;

        let instance_id = instance.id;
        let mut tasks = JoinSet::new();
        for actor in ["u1", "u2"] {
            let store = store.clone();
            tasks.spawn(async move { store.acquire_lock(instance_id, actor).await });
        }
        let mut outcomes = vec![];
        while let Some(result) = tasks.join_next().await {
            outcomes.push(result.unwrap().unwrap());
        }

        let winners = outcomes
            .iter()
            .filter(|o| **o == LockOutcome::Acquired)
            .count();
        assert_eq!(winners, 1);
        let holder = store.get_lock(instance_id).await.unwrap().unwrap();
        assert!(outcomes.contains(&LockOutcome::HeldByOther { holder }));
    }

    #[tokio::test]
    async fn test_delete_workflow_refused_with_instances() {
        let store = InMemoryWorkflowStore::new();
        let (wf, instance) = started(&store).await;

        let err = store.delete_workflow(wf.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InUse(_)));

        assert!(store.delete_instance(instance.id).await.unwrap());
        assert_eq!(store.trail_count(), 0);
        assert!(store.delete_workflow(wf.id).await.unwrap());
        assert!(store.list_routes(wf.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_view_in_use_cannot_be_deleted() {
        let store = InMemoryWorkflowStore::new();
        let wf = workflow(&store, "w").await;
        let a = store.create_view(wf.id, "A").await.unwrap();
        let unused = store.create_view(wf.id, "UNUSED").await.unwrap();
        store
            .create_route(wf.id, &NewRoute::new("START", "GO", "A"))
            .await
            .unwrap();

        assert!(matches!(
            store.delete_view(a.id).await.unwrap_err(),
            StoreError::InUse(_)
        ));
        assert!(matches!(
            store.rename_view(a.id, "B").await.unwrap_err(),
            StoreError::InUse(_)
        ));
        assert!(store.delete_view(unused.id).await.unwrap());

        let err = store.create_view(wf.id, "A").await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { kind: "view", .. }));
    }

    #[tokio::test]
    async fn test_list_instances_by_predicate() {
        let store = InMemoryWorkflowStore::new();
        let (_, instance) = started(&store).await;

        let awaiting = store
            .list_instances(&InstancePredicate::AwaitingRole("roleX".into()))
            .await
            .unwrap();
        assert_eq!(awaiting.len(), 1);

        let touched = store
            .list_instances(&InstancePredicate::TouchedByUser("u2".into()))
            .await
            .unwrap();
        assert!(touched.is_empty());

        let visible = store
            .list_instances(&InstancePredicate::visible_to(&[], "u1"))
            .await
            .unwrap();
        assert_eq!(visible[0].id, instance.id);
    }
}
