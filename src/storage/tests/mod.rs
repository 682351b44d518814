//! Behavior shared by every store implementation.

pub mod utils;

use futures::future::join_all;

use self::utils::{metrics, sample_bundle};
use crate::{
    common::EvaluationId,
    storage::{
        BundleStore,
        ResultStore,
        TaskCreateError,
        TaskStore,
        TaskTransitionError,
        UploadStore,
    },
    task::{FailureReason, StateKind, TaskRecord, TaskState},
};

pub async fn task_lifecycle<S: TaskStore>(mut store: S) {
    let id = EvaluationId::new();
    assert!(store.task(&id).await.unwrap().is_none());

    let pending = TaskRecord::pending();
    store.create_task(&id, &pending).await.unwrap().into_inner().unwrap();
    assert_eq!(store.task(&id).await.unwrap().unwrap(), pending);

    let running = pending.advance(TaskState::Running);
    store
        .transition(&id, StateKind::Pending, &running)
        .await
        .unwrap()
        .into_inner()
        .unwrap();

    let succeeded = running.advance(TaskState::Succeeded { result: metrics() });
    store
        .transition(&id, StateKind::Running, &succeeded)
        .await
        .unwrap()
        .into_inner()
        .unwrap();

    let stored = store.task(&id).await.unwrap().unwrap();
    assert_eq!(stored, succeeded);
    assert_eq!(stored.result, Some(metrics()));

    let all = store.tasks().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, id);
}

pub async fn create_task_is_single_flight<S: TaskStore>(store: S) {
    let id = EvaluationId::new();
    let attempts = (0..16).map(|_| {
        let mut store = store.clone();
        async move {
            store
                .create_task(&id, &TaskRecord::pending())
                .await
                .unwrap()
                .into_inner()
        }
    });
    let outcomes = join_all(attempts).await;

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| *e == TaskCreateError::AlreadyExists));
}

pub async fn terminal_states_are_final<S: TaskStore>(mut store: S) {
    let id = EvaluationId::new();
    let pending = TaskRecord::pending();
    store.create_task(&id, &pending).await.unwrap().into_inner().unwrap();

    // a task must run before it can finish
    let failed = pending.advance(TaskState::failed(FailureReason::Scoring, "boom"));
    assert_eq!(
        store
            .transition(&id, StateKind::Pending, &failed)
            .await
            .unwrap()
            .into_inner()
            .unwrap_err(),
        TaskTransitionError::Illegal
    );

    let running = pending.advance(TaskState::Running);
    store
        .transition(&id, StateKind::Pending, &running)
        .await
        .unwrap()
        .into_inner()
        .unwrap();
    // a second worker loses the race
    assert_eq!(
        store
            .transition(&id, StateKind::Pending, &running)
            .await
            .unwrap()
            .into_inner()
            .unwrap_err(),
        TaskTransitionError::StateMismatch
    );

    let failed = running.advance(TaskState::failed(FailureReason::DeliveryError, "timeout"));
    store
        .transition(&id, StateKind::Running, &failed)
        .await
        .unwrap()
        .into_inner()
        .unwrap();

    let succeeded = running.advance(TaskState::Succeeded { result: metrics() });
    assert_eq!(
        store
            .transition(&id, StateKind::Running, &succeeded)
            .await
            .unwrap()
            .into_inner()
            .unwrap_err(),
        TaskTransitionError::StateMismatch
    );
    assert_eq!(store.task(&id).await.unwrap().unwrap(), failed);

    assert_eq!(
        store
            .transition(&EvaluationId::new(), StateKind::Pending, &running)
            .await
            .unwrap()
            .into_inner()
            .unwrap_err(),
        TaskTransitionError::UnknownTask
    );
}

pub async fn remove_pending<S: TaskStore>(mut store: S) {
    let id = EvaluationId::new();
    let pending = TaskRecord::pending();
    store.create_task(&id, &pending).await.unwrap().into_inner().unwrap();
    assert!(store.remove_pending(&id).await.unwrap());
    assert!(store.task(&id).await.unwrap().is_none());
    assert!(!store.remove_pending(&id).await.unwrap());

    store.create_task(&id, &pending).await.unwrap().into_inner().unwrap();
    store
        .transition(&id, StateKind::Pending, &pending.advance(TaskState::Running))
        .await
        .unwrap()
        .into_inner()
        .unwrap();
    assert!(!store.remove_pending(&id).await.unwrap());
    assert!(store.task(&id).await.unwrap().is_some());
}

pub async fn bundles<S: BundleStore>(mut store: S) {
    let id = EvaluationId::new();
    assert!(store.bundle(&id).await.unwrap().is_none());

    let bundle = sample_bundle();
    store.put_bundle(&id, &bundle).await.unwrap();
    assert_eq!(store.bundle(&id).await.unwrap().unwrap(), bundle);

    store.delete_bundle(&id).await.unwrap();
    assert!(store.bundle(&id).await.unwrap().is_none());
    store.delete_bundle(&id).await.unwrap();
}

pub async fn uploads_and_results<S: UploadStore + ResultStore>(mut store: S) {
    let bundle = sample_bundle();
    let bundle_id = store.put_upload(&bundle).await.unwrap();
    assert_eq!(bundle_id, bundle.id());
    assert_eq!(store.put_upload(&bundle).await.unwrap(), bundle_id);
    assert_eq!(store.upload(&bundle_id).await.unwrap().unwrap(), bundle);

    let unknown = crate::bundle::ModelBundle::default().id();
    assert!(store.upload(&unknown).await.unwrap().is_none());

    let id = EvaluationId::new();
    assert!(store.result(&id).await.unwrap().is_none());
    store.put_result(&id, &metrics()).await.unwrap();
    store.put_result(&id, &metrics()).await.unwrap();
    assert_eq!(store.result(&id).await.unwrap().unwrap(), metrics());
}
