//! An in-memory store implementing every storage trait.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    bundle::ModelBundle,
    common::{BundleId, EvaluationId},
    metrics::MetricsResult,
    storage::{
        traits::check_transition,
        BundleStore,
        ResultStore,
        StorageError,
        StorageResult,
        TaskCreate,
        TaskCreateError,
        TaskStore,
        TaskTransition,
        TaskTransitionError,
        UploadStore,
    },
    task::{StateKind, TaskRecord},
};

#[derive(Default)]
struct Inner {
    tasks: HashMap<EvaluationId, TaskRecord>,
    bundles: HashMap<EvaluationId, ModelBundle>,
    uploads: HashMap<BundleId, ModelBundle>,
    results: HashMap<EvaluationId, MetricsResult>,
}

#[derive(Clone, Default)]
/// A store that lives as long as the process. Clones share the same data.
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::msg("the in-memory store is poisoned"))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate> {
        let mut inner = self.lock()?;
        if inner.tasks.contains_key(id) {
            return Ok(TaskCreate(Err(TaskCreateError::AlreadyExists)));
        }
        inner.tasks.insert(*id, record.clone());
        Ok(TaskCreate(Ok(())))
    }

    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        Ok(self.lock()?.tasks.get(id).cloned())
    }

    async fn transition(
        &mut self,
        id: &EvaluationId,
        from: StateKind,
        record: &TaskRecord,
    ) -> StorageResult<TaskTransition> {
        let checked = check_transition(from, record);
        if checked.is_err() {
            return Ok(checked);
        }
        let mut inner = self.lock()?;
        let outcome = match inner.tasks.get_mut(id) {
            None => Err(TaskTransitionError::UnknownTask),
            Some(current) if current.state.kind() != from => {
                Err(TaskTransitionError::StateMismatch)
            }
            Some(current) => {
                *current = record.clone();
                Ok(())
            }
        };
        Ok(TaskTransition(outcome))
    }

    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        match inner.tasks.get(id) {
            Some(record) if record.state.kind() == StateKind::Pending => {
                inner.tasks.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>> {
        Ok(self
            .lock()?
            .tasks
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect())
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        self.lock().map(|_| ())
    }
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn put_bundle(&mut self, id: &EvaluationId, bundle: &ModelBundle) -> StorageResult<()> {
        self.lock()?.bundles.insert(*id, bundle.clone());
        Ok(())
    }

    async fn bundle(&mut self, id: &EvaluationId) -> StorageResult<Option<ModelBundle>> {
        Ok(self.lock()?.bundles.get(id).cloned())
    }

    async fn delete_bundle(&mut self, id: &EvaluationId) -> StorageResult<()> {
        self.lock()?.bundles.remove(id);
        Ok(())
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn put_upload(&mut self, bundle: &ModelBundle) -> StorageResult<BundleId> {
        let id = bundle.id();
        self.lock()?.uploads.insert(id.clone(), bundle.clone());
        Ok(id)
    }

    async fn upload(&mut self, id: &BundleId) -> StorageResult<Option<ModelBundle>> {
        Ok(self.lock()?.uploads.get(id).cloned())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn put_result(
        &mut self,
        id: &EvaluationId,
        result: &MetricsResult,
    ) -> StorageResult<()> {
        self.lock()?.results.insert(*id, *result);
        Ok(())
    }

    async fn result(&mut self, id: &EvaluationId) -> StorageResult<Option<MetricsResult>> {
        Ok(self.lock()?.results.get(id).copied())
    }
}
