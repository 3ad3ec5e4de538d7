// Instance engine: start, transition and enriched reads
//
// Decision: Collaborators are consulted before the store write (subject
// check, file resolution) or after it (display names); the write itself is
// one store call, so trail and instance never diverge.
// Decision: A stale expected_version fails with Conflict; omitting it keeps
// last-write-wins semantics.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use stepflow_core::telemetry::attrs;
use stepflow_core::{
    Actor, ActorId, EngineConfig, EngineError, Instance, InstancePredicate, Payload, Result,
    RoleId, SubjectSummary, TrailEntry,
};
use stepflow_storage::{StartRecord, TransitionRecord, WorkflowStore};
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Collaborators;

/// Input for starting an instance
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartInstance {
    pub workflow_id: Uuid,
    /// Business subject the instance is bound to.
    #[schema(example = "job-application-42")]
    pub subject_id: String,
    /// Initial payload sub-record.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<Payload>,
}

/// Input for applying a transition
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TransitionInput {
    /// View the action is submitted at.
    #[schema(example = "A")]
    pub view: String,
    /// Outcome chosen at the view.
    #[schema(example = "DONE")]
    pub state: String,
    #[serde(default)]
    pub comment: Option<String>,
    /// Fields merged into the payload; last write wins per field.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<Payload>,
    /// Files attached to the trail entry.
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Reject the transition unless the instance is still at this version.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Actor id with its display name, when the identity layer knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActorRef {
    pub id: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Instance with read-side enrichment
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceDetails {
    #[serde(flatten)]
    pub instance: Instance,
    /// Display name of the role owning the next action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_role_name: Option<String>,
    pub processed_by: Vec<ActorRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectSummary>,
    /// No route leaves the view the instance awaits.
    pub is_terminal: bool,
}

/// Trail entry with the acting user's display name
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrailEntryDetails {
    #[serde(flatten)]
    pub entry: TrailEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by_name: Option<String>,
}

pub struct InstanceService {
    store: Arc<dyn WorkflowStore>,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl InstanceService {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }

    /// Create an instance at the workflow's start route.
    pub async fn start(&self, input: StartInstance, actor: &Actor) -> Result<Instance> {
        let span = tracing::info_span!(
            "stepflow.start",
            "stepflow.operation" = attrs::operation::START,
            workflow_id = %input.workflow_id,
            subject_id = %input.subject_id,
            actor_id = %actor.id,
            instance_id = tracing::field::Empty,
        );

        self.start_inner(input, actor).instrument(span).await
    }

    async fn start_inner(&self, input: StartInstance, actor: &Actor) -> Result<Instance> {
        let workflow = self
            .store
            .get_workflow(input.workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(input.workflow_id))?;

        let provider = self
            .collaborators
            .subjects
            .provider_for(workflow.subject_kind.as_deref());
        if provider.describe(&input.subject_id).await?.is_none() {
            return Err(EngineError::SubjectNotFound(input.subject_id));
        }

        let route = self
            .store
            .find_start_route(workflow.id)
            .await?
            .ok_or_else(|| {
                tracing::error!(workflow_id = %workflow.id, "workflow has no start route");
                EngineError::NoStartRoute(workflow.id)
            })?;

        let instance = self
            .store
            .start_instance(StartRecord {
                workflow_id: workflow.id,
                subject_id: input.subject_id,
                payload: input.payload,
                route,
                actor_id: actor.id.clone(),
            })
            .await?;

        tracing::Span::current().record("instance_id", instance.id.to_string().as_str());
        tracing::info!(next_view = %instance.next_view, "started instance");
        Ok(instance)
    }

    /// Apply the route selected by the submitted (view, state).
    pub async fn transition(
        &self,
        instance_id: Uuid,
        input: TransitionInput,
        actor: &Actor,
    ) -> Result<Instance> {
        let span = tracing::info_span!(
            "stepflow.transition",
            "stepflow.operation" = attrs::operation::TRANSITION,
            instance_id = %instance_id,
            view = %input.view,
            state = %input.state,
            actor_id = %actor.id,
        );

        self.transition_inner(instance_id, input, actor)
            .instrument(span)
            .await
    }

    async fn transition_inner(
        &self,
        instance_id: Uuid,
        input: TransitionInput,
        actor: &Actor,
    ) -> Result<Instance> {
        let instance = self.get(instance_id).await?;

        // Checked again inside the write, against the locked row
        if self.config.strict_view_order && input.view != instance.next_view {
            return Err(EngineError::ViewMismatch {
                expected: instance.next_view,
                submitted: input.view,
            });
        }

        let route = self
            .store
            .find_route(instance.workflow_id, &input.view, &input.state)
            .await?
            .ok_or_else(|| EngineError::InvalidTransition {
                view: input.view.clone(),
                state: input.state.clone(),
            })?;

        let files = if input.file_ids.is_empty() {
            vec![]
        } else {
            self.collaborators.files.resolve_files(&input.file_ids).await?
        };

        let (instance, entry) = self
            .store
            .apply_transition(TransitionRecord {
                instance_id,
                expected_version: input.expected_version,
                expected_view: self.config.strict_view_order.then(|| input.view.clone()),
                route,
                actor_id: actor.id.clone(),
                comment: input.comment,
                payload_patch: input.payload,
                files,
            })
            .await?;

        if entry.instance_id != instance.id || entry.next_view != instance.next_view {
            return Err(EngineError::ConsistencyViolation(format!(
                "trail entry {} does not match instance {}",
                entry.id, instance.id
            )));
        }

        tracing::info!(
            next_view = %instance.next_view,
            version = instance.version,
            "applied transition"
        );
        Ok(instance)
    }

    pub async fn get(&self, id: Uuid) -> Result<Instance> {
        self.store
            .get_instance(id)
            .await?
            .ok_or(EngineError::InstanceNotFound(id))
    }

    /// Instance joined with role name, actor names, subject and terminal flag.
    pub async fn get_details(&self, id: Uuid) -> Result<InstanceDetails> {
        let instance = self.get(id).await?;

        let next_role_name = match &instance.next_role_id {
            Some(role_id) => self.collaborators.roles.resolve_role_name(role_id).await?,
            None => None,
        };

        let mut processed_by = Vec::with_capacity(instance.processed_by_user_ids.len());
        for actor_id in &instance.processed_by_user_ids {
            processed_by.push(ActorRef {
                id: actor_id.clone(),
                name: self.collaborators.actors.display_name(actor_id).await?,
            });
        }

        let subject_kind = self
            .store
            .get_workflow(instance.workflow_id)
            .await?
            .and_then(|w| w.subject_kind);
        let subject = self
            .collaborators
            .subjects
            .provider_for(subject_kind.as_deref())
            .describe(&instance.subject_id)
            .await?;

        let is_terminal = self.is_terminal(&instance).await?;

        Ok(InstanceDetails {
            instance,
            next_role_name,
            processed_by,
            subject,
            is_terminal,
        })
    }

    /// An instance is terminal when no route leaves the view it awaits.
    pub async fn is_terminal(&self, instance: &Instance) -> Result<bool> {
        let routes = self.store.list_routes(instance.workflow_id).await?;
        Ok(!routes.iter().any(|r| r.view == instance.next_view))
    }

    /// Instances matching `filter`, newest first. Non-admin callers only see
    /// instances awaiting one of their roles or that they already touched.
    pub async fn list(&self, filter: InstancePredicate, actor: &Actor) -> Result<Vec<Instance>> {
        let predicate = if actor.admin {
            filter
        } else {
            filter.and(Self::visibility(&actor.roles, &actor.id))
        };
        Ok(self.store.list_instances(&predicate).await?)
    }

    /// Read filter for one caller, for an external authorization layer to combine.
    pub fn visibility(roles: &[RoleId], user_id: &str) -> InstancePredicate {
        InstancePredicate::visible_to(roles, user_id)
    }

    /// Trail in creation order, with actor display names.
    pub async fn trail(&self, instance_id: Uuid) -> Result<Vec<TrailEntryDetails>> {
        self.get(instance_id).await?;
        let entries = self.store.list_trail(instance_id).await?;

        let mut result = Vec::with_capacity(entries.len());
        for entry in entries {
            let processed_by_name = self
                .collaborators
                .actors
                .display_name(&entry.processed_by_user_id)
                .await?;
            result.push(TrailEntryDetails {
                entry,
                processed_by_name,
            });
        }
        Ok(result)
    }

    /// Administrative delete of an instance and its trail.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_instance(id).await? {
            return Err(EngineError::InstanceNotFound(id));
        }
        tracing::info!(instance_id = %id, "deleted instance");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use stepflow_core::{
        FileStore, InMemoryFileStore, NewRoute, StaticDirectory, SubjectProvider, SubjectRegistry,
    };
    use stepflow_storage::{InMemoryWorkflowStore, NewWorkflow};

    struct Applications;

    #[async_trait]
    impl SubjectProvider for Applications {
        async fn describe(&self, subject_id: &str) -> Result<Option<SubjectSummary>> {
            Ok(subject_id.starts_with("job-").then(|| SubjectSummary {
                id: subject_id.to_string(),
                kind: Some("job_application".into()),
                title: None,
            }))
        }
    }

    const DIRECTORY: &str = r#"
roles:
  roleX: Recruiter
actors:
  - id: u1
    name: Alice
  - id: u2
    name: Bob
"#;

    struct Fixture {
        service: InstanceService,
        store: Arc<InMemoryWorkflowStore>,
        workflow_id: Uuid,
    }

    async fn fixture(config: EngineConfig) -> Fixture {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let wf = store
            .create_workflow(NewWorkflow {
                name: "recruitment".into(),
                description: None,
                subject_kind: Some("job_application".into()),
            })
            .await
            .unwrap();
        store
            .create_route(wf.id, &NewRoute::new("START", "GO", "A").with_role("roleX").as_start())
            .await
            .unwrap();
        store
            .create_route(wf.id, &NewRoute::new("A", "REVIEW", "A").with_role("roleX"))
            .await
            .unwrap();
        store
            .create_route(wf.id, &NewRoute::new("A", "DONE", "END"))
            .await
            .unwrap();

        let files = Arc::new(InMemoryFileStore::new());
        files.insert("f1", "cv.pdf");
        let files: Arc<dyn FileStore> = files;

        let collaborators =
            Collaborators::from_directory(StaticDirectory::from_yaml(DIRECTORY).unwrap())
                .with_files(files)
                .with_subjects(
                    SubjectRegistry::new().register("job_application", Arc::new(Applications)),
                );

        Fixture {
            service: InstanceService::new(store.clone(), collaborators, config),
            store,
            workflow_id: wf.id,
        }
    }

    fn start_input(workflow_id: Uuid) -> StartInstance {
        StartInstance {
            workflow_id,
            subject_id: "job-1".into(),
            payload: None,
        }
    }

    fn step(view: &str, state: &str) -> TransitionInput {
        TransitionInput {
            view: view.into(),
            state: state.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_subject() {
        let f = fixture(EngineConfig::default()).await;
        let input = StartInstance {
            subject_id: "citizen-7".into(),
            ..start_input(f.workflow_id)
        };

        let err = f.service.start(input, &Actor::new("u1")).await.unwrap_err();
        assert!(matches!(err, EngineError::SubjectNotFound(_)));
        assert_eq!(f.store.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_transition_out_of_order_allowed_by_default() {
        let f = fixture(EngineConfig::default()).await;
        let instance = f
            .service
            .start(start_input(f.workflow_id), &Actor::new("u1"))
            .await
            .unwrap();

        // START/GO is a valid edge even though the instance awaits A
        let moved = f
            .service
            .transition(instance.id, step("START", "GO"), &Actor::new("u2"))
            .await
            .unwrap();
        assert_eq!(moved.next_view, "A");
    }

    #[tokio::test]
    async fn test_strict_view_order() {
        let f = fixture(EngineConfig::strict()).await;
        let instance = f
            .service
            .start(start_input(f.workflow_id), &Actor::new("u1"))
            .await
            .unwrap();

        let err = f
            .service
            .transition(instance.id, step("START", "GO"), &Actor::new("u2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ViewMismatch { ref expected, .. } if expected == "A"));
        assert_eq!(f.store.trail_count(), 1);

        f.service
            .transition(instance.id, step("A", "DONE"), &Actor::new("u2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_file_blocks_transition() {
        let f = fixture(EngineConfig::default()).await;
        let actor = Actor::new("u1");
        let instance = f.service.start(start_input(f.workflow_id), &actor).await.unwrap();

        let input = TransitionInput {
            file_ids: vec!["f1".into(), "missing".into()],
            ..step("A", "REVIEW")
        };
        let err = f
            .service
            .transition(instance.id, input, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::FileNotFound(_)));
        assert_eq!(f.service.get(instance.id).await.unwrap(), instance);

        let input = TransitionInput {
            file_ids: vec!["f1".into()],
            comment: Some("looks good".into()),
            ..step("A", "REVIEW")
        };
        f.service.transition(instance.id, input, &actor).await.unwrap();
        let trail = f.service.trail(instance.id).await.unwrap();
        assert_eq!(trail[1].entry.files[0].display_name, "cv.pdf");
        assert_eq!(trail[1].processed_by_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_expected_version() {
        let f = fixture(EngineConfig::default()).await;
        let actor = Actor::new("u1");
        let instance = f.service.start(start_input(f.workflow_id), &actor).await.unwrap();

        let input = TransitionInput {
            expected_version: Some(1),
            payload: json!({"score": 3}).as_object().cloned(),
            ..step("A", "REVIEW")
        };
        let moved = f.service.transition(instance.id, input.clone(), &actor).await.unwrap();
        assert_eq!(moved.version, 2);

        // Replaying the same request is now stale
        let err = f
            .service
            .transition(instance.id, input, &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { expected: 1, actual: 2, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_details_and_terminal() {
        let f = fixture(EngineConfig::default()).await;
        let instance = f
            .service
            .start(start_input(f.workflow_id), &Actor::new("u1"))
            .await
            .unwrap();

        let details = f.service.get_details(instance.id).await.unwrap();
        assert_eq!(details.next_role_name.as_deref(), Some("Recruiter"));
        assert_eq!(details.processed_by[0].name.as_deref(), Some("Alice"));
        assert_eq!(details.subject.unwrap().kind.as_deref(), Some("job_application"));
        assert!(!details.is_terminal);

        f.service
            .transition(instance.id, step("A", "DONE"), &Actor::new("u2"))
            .await
            .unwrap();
        let details = f.service.get_details(instance.id).await.unwrap();
        assert!(details.is_terminal);
        assert!(details.next_role_name.is_none());
    }

    #[tokio::test]
    async fn test_list_applies_visibility_for_non_admins() {
        let f = fixture(EngineConfig::default()).await;
        f.service
            .start(start_input(f.workflow_id), &Actor::new("u1"))
            .await
            .unwrap();

        let recruiter = Actor::new("u9").with_roles(["roleX"]);
        let outsider = Actor::new("u9");
        let admin = Actor::new("root").admin();

        let all = InstancePredicate::Any;
        assert_eq!(f.service.list(all.clone(), &recruiter).await.unwrap().len(), 1);
        assert!(f.service.list(all.clone(), &outsider).await.unwrap().is_empty());
        assert_eq!(f.service.list(all.clone(), &admin).await.unwrap().len(), 1);
        // The starter touched it
        assert_eq!(f.service.list(all, &Actor::new("u1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_instance() {
        let f = fixture(EngineConfig::default()).await;
        let instance = f
            .service
            .start(start_input(f.workflow_id), &Actor::new("u1"))
            .await
            .unwrap();

        f.service.delete(instance.id).await.unwrap();
        let err = f.service.trail(instance.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InstanceNotFound(_)));
        assert!(matches!(
            f.service.delete(instance.id).await.unwrap_err(),
            EngineError::InstanceNotFound(_)
        ));
    }
}
