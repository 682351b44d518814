//! Storage API.

use async_trait::async_trait;
use derive_more::Deref;
use displaydoc::Display;
use thiserror::Error;

use crate::{
    bundle::ModelBundle,
    common::{BundleId, EvaluationId},
    metrics::MetricsResult,
    task::{StateKind, TaskRecord},
};

/// The error type for storage operations that are not directly related to application domain.
/// These include, for example IO errors like broken pipe, file not found, out-of-memory, etc.
pub type StorageError = anyhow::Error;

/// The result of the storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
/// An abstract store of evaluation task records, owned by the evaluator.
pub trait TaskStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Creates the record of a new task.
    ///
    /// # Behavior
    ///
    /// - If no record exists for `id`, store `record` and return `StorageResult::Ok(TaskCreate)`
    ///   containing a `Result::Ok(())`.
    /// - If a record already exists, leave it untouched and return
    ///   `StorageResult::Ok(TaskCreate)` containing a
    ///   `Result::Err(TaskCreateError::AlreadyExists)`.
    ///
    /// The check and the insertion are a single atomic step: of several concurrent calls for the
    /// same `id`, exactly one succeeds.
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate>;

    /// Returns the record of a task.
    ///
    /// # Behavior
    ///
    /// - If the task does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the task exists, return `StorageResult::Ok(Option::Some(TaskRecord))`.
    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>>;

    /// Replaces the record of a task if the task is currently in the state `from`.
    ///
    /// # Behavior
    ///
    /// - If `from` may not transition to the state of `record`, return
    ///   `StorageResult::Ok(TaskTransition)` containing a
    ///   `Result::Err(TaskTransitionError::Illegal)` without looking at the store.
    /// - If the task does not exist, return a `Result::Err(TaskTransitionError::UnknownTask)`.
    /// - If the task is not in the state `from`, return a
    ///   `Result::Err(TaskTransitionError::StateMismatch)`.
    /// - Otherwise replace the record and return a `Result::Ok(())`.
    ///
    /// The comparison and the replacement are a single atomic step.
    async fn transition(
        &mut self,
        id: &EvaluationId,
        from: StateKind,
        record: &TaskRecord,
    ) -> StorageResult<TaskTransition>;

    /// Deletes a task that never left the `Pending` state.
    ///
    /// Returns `true` if the task was deleted.
    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool>;

    /// Returns all the task records.
    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>>;

    /// Checks if the [`TaskStore`] is ready to process requests.
    ///
    /// # Behavior
    ///
    /// If the [`TaskStore`] is ready to process requests, return `StorageResult::Ok(())`.
    /// If the [`TaskStore`] cannot process requests because of a connection error,
    /// for example, return `StorageResult::Err(error)`.
    async fn is_ready(&mut self) -> StorageResult<()>;
}

#[async_trait]
/// An abstract store of received model bundles, owned by the evaluator.
pub trait BundleStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Stores the bundle received for an evaluation, overriding any previous one.
    async fn put_bundle(&mut self, id: &EvaluationId, bundle: &ModelBundle) -> StorageResult<()>;

    /// Returns the bundle received for an evaluation.
    ///
    /// # Behavior
    ///
    /// - If the bundle does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the bundle exists, return `StorageResult::Ok(Option::Some(ModelBundle))`.
    async fn bundle(&mut self, id: &EvaluationId) -> StorageResult<Option<ModelBundle>>;

    /// Deletes the bundle received for an evaluation. Deleting a missing bundle is not an error.
    async fn delete_bundle(&mut self, id: &EvaluationId) -> StorageResult<()>;
}

#[async_trait]
/// An abstract store of uploaded model bundles, owned by the model developer.
pub trait UploadStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Stores an uploaded bundle under its content address and returns the address.
    ///
    /// Storing the same bundle twice is not an error.
    async fn put_upload(&mut self, bundle: &ModelBundle) -> StorageResult<BundleId>;

    /// Returns an uploaded bundle.
    ///
    /// # Behavior
    ///
    /// - If the bundle does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the bundle exists, return `StorageResult::Ok(Option::Some(ModelBundle))`.
    async fn upload(&mut self, id: &BundleId) -> StorageResult<Option<ModelBundle>>;
}

#[async_trait]
/// An abstract store of evaluation results, owned by the model developer.
pub trait ResultStore
where
    Self: Clone + Send + Sync + 'static,
{
    /// Stores the result of an evaluation, overriding any previous one.
    async fn put_result(&mut self, id: &EvaluationId, result: &MetricsResult)
        -> StorageResult<()>;

    /// Returns the result of an evaluation.
    ///
    /// # Behavior
    ///
    /// - If the result does not exist, return `StorageResult::Ok(Option::None)`.
    /// - If the result exists, return `StorageResult::Ok(Option::Some(MetricsResult))`.
    async fn result(&mut self, id: &EvaluationId) -> StorageResult<Option<MetricsResult>>;
}

/// A wrapper that contains the result of the "create task" operation.
#[derive(Deref, Debug)]
pub struct TaskCreate(pub(crate) Result<(), TaskCreateError>);

impl TaskCreate {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), TaskCreateError> {
        self.0
    }
}

/// Error that can occur when creating a task.
#[derive(Display, Error, Debug, PartialEq, Eq)]
pub enum TaskCreateError {
    /// a task with the same evaluation id already exists
    AlreadyExists,
}

/// A wrapper that contains the result of the "transition task" operation.
#[derive(Deref, Debug)]
pub struct TaskTransition(pub(crate) Result<(), TaskTransitionError>);

impl TaskTransition {
    /// Unwraps this wrapper, returning the underlying result.
    pub fn into_inner(self) -> Result<(), TaskTransitionError> {
        self.0
    }
}

/// Error that can occur when moving a task to another state.
#[derive(Display, Error, Debug, PartialEq, Eq)]
pub enum TaskTransitionError {
    /// the task does not exist
    UnknownTask,
    /// the task is not in the expected state
    StateMismatch,
    /// the transition is not part of the task lifecycle
    Illegal,
}

/// Checks a transition before it reaches a store.
pub(crate) fn check_transition(from: StateKind, record: &TaskRecord) -> TaskTransition {
    if from.can_transition_to(record.state.kind()) {
        TaskTransition(Ok(()))
    } else {
        TaskTransition(Err(TaskTransitionError::Illegal))
    }
}
