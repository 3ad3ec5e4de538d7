// End-to-end engine scenario on the in-memory store
// Run with: cargo test -p stepflow-control-plane --test engine_scenario_test
//
// Workflow W: views START, A, END; states GO, DONE;
// routes (START, GO) -> (A, roleX) [start], (A, DONE) -> (END, none).

use async_trait::async_trait;
use std::sync::Arc;
use stepflow_control_plane::api::workflows::CreateWorkflowRequest;
use stepflow_control_plane::services::{StartInstance, TransitionInput};
use stepflow_control_plane::{Collaborators, Engine};
use stepflow_core::{
    Actor, EngineConfig, EngineError, FileRef, FileStore, InstancePredicate, LockOutcome,
    NewRoute, StaticDirectory,
};
use stepflow_storage::InMemoryWorkflowStore;
use uuid::Uuid;

/// File store that yields before answering, so concurrent callers interleave
struct YieldingFiles;

#[async_trait]
impl FileStore for YieldingFiles {
    async fn resolve_files(&self, file_ids: &[String]) -> stepflow_core::Result<Vec<FileRef>> {
        tokio::task::yield_now().await;
        Ok(file_ids
            .iter()
            .map(|id| FileRef {
                id: id.clone(),
                display_name: format!("{id}.pdf"),
            })
            .collect())
    }
}

async fn engine_with_workflow(config: EngineConfig) -> (Engine, Uuid) {
    engine_with_files(config, None).await
}

async fn engine_with_files(
    config: EngineConfig,
    files: Option<Arc<dyn FileStore>>,
) -> (Engine, Uuid) {
    let directory = StaticDirectory::from_yaml(
        r#"
roles:
  roleX: Recruiter
actors:
  - id: u1
    name: Alice
  - id: u2
    name: Bob
    roles: [roleX]
"#,
    )
    .unwrap();
    let mut collaborators = Collaborators::from_directory(directory);
    if let Some(files) = files {
        collaborators = collaborators.with_files(files);
    }
    let engine = Engine::new(
        Arc::new(InMemoryWorkflowStore::new()),
        collaborators,
        config,
    );

    let wf = engine
        .workflows
        .create(CreateWorkflowRequest {
            name: "W".into(),
            description: None,
            subject_kind: None,
        })
        .await
        .unwrap();
    for view in ["START", "A", "END"] {
        engine.workflows.create_view(wf.id, view).await.unwrap();
    }
    for state in ["GO", "DONE"] {
        engine.workflows.create_state(wf.id, state).await.unwrap();
    }
    engine
        .routes
        .create(wf.id, NewRoute::new("START", "GO", "A").with_role("roleX").as_start())
        .await
        .unwrap();
    engine
        .routes
        .create(wf.id, NewRoute::new("A", "DONE", "END"))
        .await
        .unwrap();

    (engine, wf.id)
}

fn submit(view: &str, state: &str) -> TransitionInput {
    TransitionInput {
        view: view.into(),
        state: state.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_start_transition_and_rejected_transition() {
    let (engine, wf) = engine_with_workflow(EngineConfig::default()).await;
    let u1 = Actor::new("u1");
    let u2 = Actor::new("u2").with_roles(["roleX"]);

    // Step 1: start
    let instance = engine
        .instances
        .start(
            StartInstance {
                workflow_id: wf,
                subject_id: "job-1".into(),
                payload: None,
            },
            &u1,
        )
        .await
        .unwrap();
    assert_eq!(instance.next_view, "A");
    assert_eq!(instance.next_role_id.as_deref(), Some("roleX"));

    let trail = engine.instances.trail(instance.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(
        (trail[0].entry.view.as_str(), trail[0].entry.state.as_str()),
        ("START", "GO")
    );
    assert_eq!(trail[0].entry.next_view, "A");
    assert_eq!(trail[0].entry.processed_by_user_id, "u1");

    // Step 2: (A, DONE) by u2
    let after_done = engine
        .instances
        .transition(instance.id, submit("A", "DONE"), &u2)
        .await
        .unwrap();
    assert_eq!(after_done.next_view, "END");
    assert!(after_done.next_role_id.is_none());
    assert_eq!(after_done.processed_by_user_ids, vec!["u1", "u2"]);

    let trail_after_done = engine.instances.trail(instance.id).await.unwrap();
    let path: Vec<_> = trail_after_done
        .iter()
        .map(|t| (t.entry.view.as_str(), t.entry.state.as_str()))
        .collect();
    assert_eq!(path, vec![("START", "GO"), ("A", "DONE")]);
    assert_eq!(trail_after_done[1].processed_by_name.as_deref(), Some("Bob"));

    // Step 3: (A, GO) has no route
    let err = engine
        .instances
        .transition(instance.id, submit("A", "GO"), &u2)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    assert_eq!(engine.instances.get(instance.id).await.unwrap(), after_done);
    let trail_after_error = engine.instances.trail(instance.id).await.unwrap();
    assert_eq!(trail_after_error.len(), trail_after_done.len());
    for (a, b) in trail_after_error.iter().zip(&trail_after_done) {
        assert_eq!(a.entry, b.entry);
    }

    let details = engine.instances.get_details(instance.id).await.unwrap();
    assert!(details.is_terminal);
    let names: Vec<_> = details
        .processed_by
        .iter()
        .map(|a| a.name.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_strict_view_order_rejects_out_of_order_views() {
    let (engine, wf) = engine_with_workflow(EngineConfig::strict()).await;
    let actor = Actor::new("u1");
    let instance = engine
        .instances
        .start(
            StartInstance {
                workflow_id: wf,
                subject_id: "job-2".into(),
                payload: None,
            },
            &actor,
        )
        .await
        .unwrap();

    // (START, GO) has a route, but the instance awaits A
    let err = engine
        .instances
        .transition(instance.id, submit("START", "GO"), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ViewMismatch { .. }));

    let (engine, wf) = engine_with_workflow(EngineConfig::default()).await;
    let instance = engine
        .instances
        .start(
            StartInstance {
                workflow_id: wf,
                subject_id: "job-2".into(),
                payload: None,
            },
            &actor,
        )
        .await
        .unwrap();
    let replayed = engine
        .instances
        .transition(instance.id, submit("START", "GO"), &actor)
        .await
        .unwrap();
    assert_eq!(replayed.version, 2);
    assert_eq!(replayed.processed_by_user_ids, vec!["u1"]);
}

#[tokio::test]
async fn test_visibility_and_locks_across_actors() {
    let (engine, wf) = engine_with_workflow(EngineConfig::default()).await;
    let u1 = Actor::new("u1");
    let u2 = Actor::new("u2").with_roles(["roleX"]);
    let outsider = Actor::new("u9").with_roles(["roleZ"]);

    let instance = engine
        .instances
        .start(
            StartInstance {
                workflow_id: wf,
                subject_id: "job-3".into(),
                payload: None,
            },
            &u1,
        )
        .await
        .unwrap();

    for (actor, visible) in [(&u1, 1), (&u2, 1), (&outsider, 0)] {
        let listed = engine
            .instances
            .list(InstancePredicate::Any, actor)
            .await
            .unwrap();
        assert_eq!(listed.len(), visible, "{}", actor.id);
    }

    assert_eq!(
        engine.locks.acquire(instance.id, &u2).await.unwrap(),
        LockOutcome::Acquired
    );
    assert_eq!(
        engine.locks.acquire(instance.id, &u1).await.unwrap(),
        LockOutcome::HeldByOther {
            holder: "u2".into()
        }
    );
    let held = engine
        .instances
        .list(InstancePredicate::HeldBy("u2".into()), &u2)
        .await
        .unwrap();
    assert_eq!(held.len(), 1);

    // The lock does not gate transitions
    engine
        .instances
        .transition(instance.id, submit("A", "DONE"), &u1)
        .await
        .unwrap();
    engine.locks.release(instance.id, &u2).await.unwrap();
    assert!(engine.locks.get(instance.id).await.unwrap().holder.is_none());
}

#[tokio::test]
async fn test_strict_view_order_holds_for_interleaved_submissions() {
    let files: Arc<dyn FileStore> = Arc::new(YieldingFiles);
    let (engine, wf) = engine_with_files(EngineConfig::strict(), Some(files)).await;
    let u1 = Actor::new("u1");
    let u2 = Actor::new("u2").with_roles(["roleX"]);
    let instance = engine
        .instances
        .start(
            StartInstance {
                workflow_id: wf,
                subject_id: "job-4".into(),
                payload: None,
            },
            &u1,
        )
        .await
        .unwrap();

    // Both callers read next_view == A before either write lands
    let with_file = |actor: &str| TransitionInput {
        file_ids: vec![format!("cv-{actor}")],
        ..submit("A", "DONE")
    };
    let (first, second) = tokio::join!(
        engine.instances.transition(instance.id, with_file("u1"), &u1),
        engine.instances.transition(instance.id, with_file("u2"), &u2),
    );

    let accepted = [first.is_ok(), second.is_ok()];
    assert_eq!(accepted.iter().filter(|ok| **ok).count(), 1);
    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(
        err,
        EngineError::ViewMismatch { ref expected, ref submitted }
            if expected == "END" && submitted == "A"
    ));

    let trail = engine.instances.trail(instance.id).await.unwrap();
    let path: Vec<_> = trail
        .iter()
        .map(|t| (t.entry.view.as_str(), t.entry.state.as_str()))
        .collect();
    assert_eq!(path, vec![("START", "GO"), ("A", "DONE")]);
    assert_eq!(engine.instances.get(instance.id).await.unwrap().version, 2);
}
