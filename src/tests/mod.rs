pub mod utils;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    bundle::UploadedFile,
    client::{DeveloperApi, EvaluatorApi, RetryPolicy, TransportError},
    common::EvaluationId,
    crypto::SharedKey,
    developer::{Developer, DeveloperError},
    evaluator::{Evaluator, EvaluatorError},
    metrics::calculate_metrics,
    model::{lexicon::tests::lexicon_bundle, LexiconLoader},
    storage::{FsStore, MemoryStore},
    task::{task_queue, TaskRunner, TaskState},
};

const DATASET: &str = r#"[
    {"text": "Persistent fever", "label": 1},
    {"text": "routine follow-up", "label": 0},
    {"text": "no complaints", "label": 0},
    {"text": "routine visit, mild pain", "label": 1}
]"#;

/// Hands sealed requests straight to an in-process evaluator.
struct EvaluatorLoopback(Arc<Evaluator<MemoryStore>>);

#[async_trait]
impl EvaluatorApi for EvaluatorLoopback {
    async fn send_model(&self, id: EvaluationId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.0
            .receive_model(id, &payload)
            .await
            .map_err(|e| match e {
                EvaluatorError::DuplicateEvaluation(_) => TransportError::Rejected(409),
                EvaluatorError::QueueFull | EvaluatorError::QueueClosed => {
                    TransportError::Rejected(503)
                }
                _ => TransportError::Rejected(400),
            })
    }
}

/// Hands sealed results straight to an in-process developer.
struct DeveloperLoopback(Arc<Developer<FsStore, EvaluatorLoopback>>);

#[async_trait]
impl DeveloperApi for DeveloperLoopback {
    async fn send_results(&self, id: EvaluationId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.0.receive_results(id, &payload).await.map_err(|e| match e {
            DeveloperError::Storage(_) => TransportError::Rejected(500),
            _ => TransportError::Rejected(400),
        })
    }
}

fn lexicon_uploads() -> Vec<UploadedFile> {
    lexicon_bundle()
        .files()
        .iter()
        .map(|(role, file)| UploadedFile {
            field: role.as_str().to_string(),
            filename: Some(file.filename.clone()),
            bytes: file.bytes.clone(),
        })
        .collect()
}

async fn wait_for_terminal_state(evaluator: &Evaluator<MemoryStore>, id: EvaluationId) -> TaskState {
    for _ in 0..200 {
        let state = evaluator.get_status(id).await.unwrap();
        if state.kind().is_terminal() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("evaluation {} did not finish", id);
}

#[tokio::test]
async fn test_evaluation_between_developer_and_evaluator() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.json");
    std::fs::write(&dataset, DATASET).unwrap();
    let key = SharedKey::generate();

    let evaluator_store = MemoryStore::new();
    let (sender, receiver) = task_queue(8);
    let evaluator = Arc::new(Evaluator::new(evaluator_store.clone(), key.clone(), sender));

    let developer_store = FsStore::new(dir.path().join("developer")).await.unwrap();
    let developer = Arc::new(Developer::new(
        developer_store,
        EvaluatorLoopback(evaluator.clone()),
        key.clone(),
    ));

    let runner = TaskRunner::new(
        evaluator_store,
        DeveloperLoopback(developer.clone()),
        Arc::new(LexiconLoader),
        key,
        dataset,
        2,
        RetryPolicy::default(),
    );
    tokio::spawn(runner.run(receiver));

    let reference = developer
        .upload_model_bundle(lexicon_uploads())
        .await
        .unwrap();
    let id = developer
        .initiate_evaluation(&reference.bundle_id)
        .await
        .unwrap();

    let expected = calculate_metrics(&[1, 0, 0, 0], &[1, 0, 0, 1])
        .unwrap()
        .anonymize();
    match wait_for_terminal_state(&evaluator, id).await {
        TaskState::Succeeded { result } => assert_eq!(result, expected),
        state => panic!("unexpected state {:?}", state),
    }
    assert_eq!(developer.get_results(id).await.unwrap(), expected);

    // evaluating the same bundle again starts a separate evaluation
    assert!(matches!(
        developer.initiate_evaluation(&reference.bundle_id).await,
        Ok(other) if other != id
    ));
    assert!(matches!(
        evaluator.get_status(id).await,
        Ok(TaskState::Succeeded { .. })
    ));
}

#[tokio::test]
async fn test_results_sealed_with_another_key_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = dir.path().join("dataset.json");
    std::fs::write(&dataset, DATASET).unwrap();

    let evaluator_store = MemoryStore::new();
    let (sender, receiver) = task_queue(8);
    let evaluator = Arc::new(Evaluator::new(
        evaluator_store.clone(),
        SharedKey::generate(),
        sender,
    ));
    let developer = Arc::new(Developer::new(
        FsStore::new(dir.path().join("developer")).await.unwrap(),
        EvaluatorLoopback(evaluator.clone()),
        SharedKey::generate(),
    ));
    let runner = TaskRunner::new(
        evaluator_store,
        DeveloperLoopback(developer.clone()),
        Arc::new(LexiconLoader),
        SharedKey::generate(),
        dataset,
        1,
        RetryPolicy::default(),
    );
    tokio::spawn(runner.run(receiver));

    let reference = developer
        .upload_model_bundle(lexicon_uploads())
        .await
        .unwrap();
    assert!(matches!(
        developer.initiate_evaluation(&reference.bundle_id).await,
        Err(DeveloperError::Transport(TransportError::Rejected(400)))
    ));
}
