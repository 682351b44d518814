//! A generic store.

use async_trait::async_trait;

use crate::{
    bundle::ModelBundle,
    common::EvaluationId,
    storage::{BundleStore, StorageResult, TaskCreate, TaskStore, TaskTransition},
    task::{StateKind, TaskRecord},
};

#[derive(Clone)]
/// A generic evaluator store, combining a task store with a bundle store.
pub struct Store<T, B>
where
    T: TaskStore,
    B: BundleStore,
{
    /// A task store.
    tasks: T,
    /// A bundle store.
    bundles: B,
}

impl<T, B> Store<T, B>
where
    T: TaskStore,
    B: BundleStore,
{
    /// Creates a new [`Store`].
    pub fn new(tasks: T, bundles: B) -> Self {
        Self { tasks, bundles }
    }
}

#[async_trait]
impl<T, B> TaskStore for Store<T, B>
where
    T: TaskStore,
    B: BundleStore,
{
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate> {
        self.tasks.create_task(id, record).await
    }

    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        self.tasks.task(id).await
    }

    async fn transition(
        &mut self,
        id: &EvaluationId,
        from: StateKind,
        record: &TaskRecord,
    ) -> StorageResult<TaskTransition> {
        self.tasks.transition(id, from, record).await
    }

    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool> {
        self.tasks.remove_pending(id).await
    }

    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>> {
        self.tasks.tasks().await
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        self.tasks.is_ready().await
    }
}

#[async_trait]
impl<T, B> BundleStore for Store<T, B>
where
    T: TaskStore,
    B: BundleStore,
{
    async fn put_bundle(&mut self, id: &EvaluationId, bundle: &ModelBundle) -> StorageResult<()> {
        self.bundles.put_bundle(id, bundle).await
    }

    async fn bundle(&mut self, id: &EvaluationId) -> StorageResult<Option<ModelBundle>> {
        self.bundles.bundle(id).await
    }

    async fn delete_bundle(&mut self, id: &EvaluationId) -> StorageResult<()> {
        self.bundles.delete_bundle(id).await
    }
}
