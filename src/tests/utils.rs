use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    bundle::ModelBundle,
    common::EvaluationId,
    storage::{
        BundleStore,
        MemoryStore,
        StorageResult,
        TaskCreate,
        TaskStore,
        TaskTransition,
    },
    task::{StateKind, TaskRecord},
};

#[derive(Clone, Default)]
/// A [`MemoryStore`] remembering every state each task went through.
pub struct RecordingStore {
    inner: MemoryStore,
    history: Arc<Mutex<HashMap<EvaluationId, Vec<StateKind>>>>,
    failing_terminal_writes: Arc<AtomicUsize>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, id: &EvaluationId) -> Vec<StateKind> {
        self.history
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Makes the next `count` writes of a terminal state fail with a storage error.
    pub fn fail_terminal_writes(&self, count: usize) {
        self.failing_terminal_writes.store(count, Ordering::SeqCst);
    }

    fn record(&self, id: &EvaluationId, kind: StateKind) {
        self.history
            .lock()
            .unwrap()
            .entry(*id)
            .or_default()
            .push(kind);
    }
}

#[async_trait]
impl TaskStore for RecordingStore {
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate> {
        let created = self.inner.create_task(id, record).await?;
        if created.is_ok() {
            self.record(id, record.state.kind());
        }
        Ok(created)
    }

    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        self.inner.task(id).await
    }

    async fn transition(
        &mut self,
        id: &EvaluationId,
        from: StateKind,
        record: &TaskRecord,
    ) -> StorageResult<TaskTransition> {
        if record.state.kind().is_terminal()
            && self
                .failing_terminal_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(anyhow::anyhow!("the task table is unavailable"));
        }
        let moved = self.inner.transition(id, from, record).await?;
        if moved.is_ok() {
            self.record(id, record.state.kind());
        }
        Ok(moved)
    }

    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool> {
        self.inner.remove_pending(id).await
    }

    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>> {
        self.inner.tasks().await
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        TaskStore::is_ready(&mut self.inner).await
    }
}

#[async_trait]
impl BundleStore for RecordingStore {
    async fn put_bundle(&mut self, id: &EvaluationId, bundle: &ModelBundle) -> StorageResult<()> {
        self.inner.put_bundle(id, bundle).await
    }

    async fn bundle(&mut self, id: &EvaluationId) -> StorageResult<Option<ModelBundle>> {
        self.inner.bundle(id).await
    }

    async fn delete_bundle(&mut self, id: &EvaluationId) -> StorageResult<()> {
        self.inner.delete_bundle(id).await
    }
}
