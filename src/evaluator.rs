//! The evaluator coordinator, run by the data owner.
//!
//! It accepts sealed evaluation requests, records one task per evaluation id and hands the task
//! over to the [`TaskRunner`](crate::task::TaskRunner) through the task queue. Accepting a
//! request never waits for the evaluation itself.

use thiserror::Error;

use crate::{
    bundle::BundleError,
    common::EvaluationId,
    crypto::{self, CodecError, SharedKey},
    request::EvaluationRequest,
    storage::{BundleStore, StorageError, TaskCreateError, TaskStore},
    task::{FailureReason, QueueError, StateKind, TaskRecord, TaskSender, TaskState},
};

/// Errors of the evaluator coordinator.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("the payload belongs to evaluation {payload}, not {header}")]
    IdMismatch {
        header: EvaluationId,
        payload: EvaluationId,
    },
    #[error("incomplete model bundle: {0}")]
    Bundle(#[from] BundleError),
    #[error("evaluation {0} already exists")]
    DuplicateEvaluation(EvaluationId),
    #[error("evaluation {0} not found")]
    NotFound(EvaluationId),
    #[error("too many pending evaluations, try again later")]
    QueueFull,
    #[error("the task queue is closed")]
    QueueClosed,
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl From<QueueError> for EvaluatorError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full => Self::QueueFull,
            QueueError::Closed => Self::QueueClosed,
        }
    }
}

/// The evaluator coordinator.
pub struct Evaluator<S> {
    store: S,
    key: SharedKey,
    queue: TaskSender,
}

impl<S> Evaluator<S>
where
    S: TaskStore + BundleStore,
{
    pub fn new(store: S, key: SharedKey, queue: TaskSender) -> Self {
        Self { store, key, queue }
    }

    /// Accepts a sealed evaluation request.
    ///
    /// On success the evaluation is `Pending` and queued. On failure nothing is left behind: a
    /// rejected request can be retried with the same id.
    ///
    /// # Errors
    /// - [`EvaluatorError::Codec`] if the payload is not authentic or not a request.
    /// - [`EvaluatorError::IdMismatch`] if `id` differs from the id sealed in the payload.
    /// - [`EvaluatorError::Bundle`] if the bundle lacks a file.
    /// - [`EvaluatorError::DuplicateEvaluation`] if a task with this id exists.
    /// - [`EvaluatorError::QueueFull`] if too many evaluations are waiting.
    pub async fn receive_model(
        &self,
        id: EvaluationId,
        payload: &[u8],
    ) -> Result<(), EvaluatorError> {
        let request: EvaluationRequest = crypto::decrypt(payload, &self.key)?;
        if request.evaluation_id != id {
            return Err(EvaluatorError::IdMismatch {
                header: id,
                payload: request.evaluation_id,
            });
        }
        request.bundle.validate()?;

        let mut store = self.store.clone();
        if let Err(TaskCreateError::AlreadyExists) = store
            .create_task(&id, &TaskRecord::pending())
            .await?
            .into_inner()
        {
            return Err(EvaluatorError::DuplicateEvaluation(id));
        }

        if let Err(e) = store.put_bundle(&id, &request.bundle).await {
            self.rollback(&mut store, &id).await;
            return Err(e.into());
        }
        if let Err(e) = self.queue.enqueue(id) {
            self.rollback(&mut store, &id).await;
            return Err(e.into());
        }
        info!(
            "accepted evaluation {} with files {:?}",
            id,
            request.bundle.filenames()
        );
        Ok(())
    }

    async fn rollback(&self, store: &mut S, id: &EvaluationId) {
        if let Err(e) = store.delete_bundle(id).await {
            warn!("failed to delete the bundle of evaluation {}: {:#}", id, e);
        }
        if let Err(e) = store.remove_pending(id).await {
            warn!("failed to delete the task of evaluation {}: {:#}", id, e);
        }
    }

    /// Returns the current state of an evaluation.
    pub async fn get_status(&self, id: EvaluationId) -> Result<TaskState, EvaluatorError> {
        self.record(id).await.map(|record| record.state)
    }

    /// Returns the full task record of an evaluation, including its timestamps and the
    /// metrics kept after a failed delivery.
    pub async fn record(&self, id: EvaluationId) -> Result<TaskRecord, EvaluatorError> {
        self.store
            .clone()
            .task(&id)
            .await?
            .ok_or(EvaluatorError::NotFound(id))
    }

    /// Brings the task table back into a consistent state after a restart.
    ///
    /// `Pending` tasks are queued again. `Running` tasks were interrupted and fail with
    /// [`FailureReason::Interrupted`]. Returns the number of queued tasks.
    pub async fn recover(&self) -> Result<usize, EvaluatorError> {
        let mut store = self.store.clone();
        let mut queued = 0;
        for (id, record) in store.tasks().await? {
            match record.state.kind() {
                StateKind::Pending => {
                    self.queue.enqueue_wait(id).await?;
                    queued += 1;
                }
                StateKind::Running => {
                    let failed = record.advance(TaskState::failed(
                        FailureReason::Interrupted,
                        "the evaluator stopped during the evaluation",
                    ));
                    if let Err(e) = store
                        .transition(&id, StateKind::Running, &failed)
                        .await?
                        .into_inner()
                    {
                        warn!("failed to mark evaluation {} as interrupted: {}", id, e);
                    }
                }
                StateKind::Succeeded | StateKind::Failed => {}
            }
        }
        if queued > 0 {
            info!("requeued {} pending evaluations", queued);
        }
        Ok(queued)
    }

    /// Checks that the storage backend is reachable.
    pub async fn is_ready(&self) -> Result<(), EvaluatorError> {
        Ok(self.store.clone().is_ready().await?)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::{
        bundle::{FileRole, ModelBundle},
        storage::{tests::utils::sample_bundle, MemoryStore},
        task::{task_queue, TaskReceiver},
    };

    fn evaluator(capacity: usize) -> (Evaluator<MemoryStore>, TaskReceiver, SharedKey) {
        let key = SharedKey::generate();
        let (tx, rx) = task_queue(capacity);
        (Evaluator::new(MemoryStore::new(), key.clone(), tx), rx, key)
    }

    fn sealed(id: EvaluationId, bundle: ModelBundle, key: &SharedKey) -> Vec<u8> {
        crypto::encrypt(&EvaluationRequest::new(id, bundle), key).unwrap()
    }

    #[tokio::test]
    async fn test_receive_model() {
        let (evaluator, mut rx, key) = evaluator(4);
        let id = EvaluationId::new();

        evaluator
            .receive_model(id, &sealed(id, sample_bundle(), &key))
            .await
            .unwrap();

        assert_eq!(evaluator.get_status(id).await.unwrap(), TaskState::Pending);
        assert_eq!(rx.next().await, Some(id));
        assert_eq!(
            evaluator.store.clone().bundle(&id).await.unwrap().unwrap(),
            sample_bundle()
        );
    }

    #[tokio::test]
    async fn test_duplicate_evaluation_is_rejected() {
        let (evaluator, _rx, key) = evaluator(4);
        let id = EvaluationId::new();
        let payload = sealed(id, sample_bundle(), &key);

        evaluator.receive_model(id, &payload).await.unwrap();
        assert!(matches!(
            evaluator.receive_model(id, &payload).await,
            Err(EvaluatorError::DuplicateEvaluation(dup)) if dup == id
        ));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_create_one_task() {
        let (evaluator, mut rx, key) = evaluator(16);
        let id = EvaluationId::new();
        let payload = sealed(id, sample_bundle(), &key);

        let outcomes = join_all((0..8).map(|_| evaluator.receive_model(id, &payload))).await;
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert_eq!(rx.next().await, Some(id));
        drop(evaluator);
        assert_eq!(rx.next().await, None);
    }

    #[tokio::test]
    async fn test_tampered_payload_creates_no_task() {
        let (evaluator, _rx, key) = evaluator(4);
        let id = EvaluationId::new();
        let mut payload = sealed(id, sample_bundle(), &key);
        let last = payload.len() - 1;
        payload[last] ^= 0xff;

        assert!(matches!(
            evaluator.receive_model(id, &payload).await,
            Err(EvaluatorError::Codec(CodecError::Integrity))
        ));
        assert!(matches!(
            evaluator.get_status(id).await,
            Err(EvaluatorError::NotFound(_))
        ));

        let foreign = sealed(id, sample_bundle(), &SharedKey::generate());
        assert!(matches!(
            evaluator.receive_model(id, &foreign).await,
            Err(EvaluatorError::Codec(CodecError::Integrity))
        ));
    }

    #[tokio::test]
    async fn test_id_mismatch_and_incomplete_bundle() {
        let (evaluator, _rx, key) = evaluator(4);
        let id = EvaluationId::new();

        let other = sealed(EvaluationId::new(), sample_bundle(), &key);
        assert!(matches!(
            evaluator.receive_model(id, &other).await,
            Err(EvaluatorError::IdMismatch { header, .. }) if header == id
        ));

        let mut files = sample_bundle().files().clone();
        files.remove(&FileRole::Vocab);
        let incomplete = sealed(id, ModelBundle::from_files(files), &key);
        assert!(matches!(
            evaluator.receive_model(id, &incomplete).await,
            Err(EvaluatorError::Bundle(BundleError::Incomplete(FileRole::Vocab)))
        ));
        assert!(matches!(
            evaluator.get_status(id).await,
            Err(EvaluatorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_full_queue_rolls_back() {
        let (evaluator, _rx, key) = evaluator(1);
        let first = EvaluationId::new();
        evaluator
            .receive_model(first, &sealed(first, sample_bundle(), &key))
            .await
            .unwrap();

        let second = EvaluationId::new();
        let payload = sealed(second, sample_bundle(), &key);
        assert!(matches!(
            evaluator.receive_model(second, &payload).await,
            Err(EvaluatorError::QueueFull)
        ));
        assert!(matches!(
            evaluator.get_status(second).await,
            Err(EvaluatorError::NotFound(_))
        ));
        assert!(evaluator
            .store
            .clone()
            .bundle(&second)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_recover() {
        let (evaluator, mut rx, _key) = evaluator(4);
        let mut store = evaluator.store.clone();

        let pending = EvaluationId::new();
        store
            .create_task(&pending, &TaskRecord::pending())
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        let running = EvaluationId::new();
        let record = TaskRecord::pending();
        store
            .create_task(&running, &record)
            .await
            .unwrap()
            .into_inner()
            .unwrap();
        store
            .transition(&running, StateKind::Pending, &record.advance(TaskState::Running))
            .await
            .unwrap()
            .into_inner()
            .unwrap();

        assert_eq!(evaluator.recover().await.unwrap(), 1);
        assert_eq!(rx.next().await, Some(pending));
        assert!(matches!(
            evaluator.get_status(running).await.unwrap(),
            TaskState::Failed {
                reason: FailureReason::Interrupted,
                ..
            }
        ));
        assert!(matches!(
            evaluator.get_status(EvaluationId::new()).await,
            Err(EvaluatorError::NotFound(_))
        ));
    }
}
