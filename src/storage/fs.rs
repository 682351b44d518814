//! A store keeping its data in a local directory.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!     tasks/<evaluation_id>.json                // task records
//!     bundles/received_model_<evaluation_id>    // received bundles, bincode encoded
//!     uploads/<bundle_id>/<role>/<filename>     // uploaded files, as they were sent
//!     results/results_<evaluation_id>.json      // received results
//! ```
//!
//! Every file is written to a temporary sibling first and renamed into place, so readers never
//! observe a partially written file. Task records are only modified while holding a lock shared
//! by all the clones of a store: one [`FsStore`] must own a directory.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::{fs, sync::Mutex};
use uuid::Uuid;

use crate::{
    bundle::{FileRole, ModelBundle, ModelFile},
    common::{BundleId, EvaluationId},
    metrics::MetricsResult,
    storage::{
        traits::check_transition,
        BundleStore,
        ResultStore,
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

const TASKS: &str = "tasks";
const BUNDLES: &str = "bundles";
const UPLOADS: &str = "uploads";
const RESULTS: &str = "results";

#[derive(Clone, Debug)]
pub struct FsStore {
    root: Arc<PathBuf>,
    tasks_lock: Arc<Mutex<()>>,
}

impl FsStore {
    /// Opens the store rooted at `root`, creating its directories if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        for dir in [TASKS, BUNDLES, UPLOADS, RESULTS].iter() {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        Ok(Self {
            root: Arc::new(root),
            tasks_lock: Arc::new(Mutex::new(())),
        })
    }

    fn task_path(&self, id: &EvaluationId) -> PathBuf {
        self.root.join(TASKS).join(format!("{}.json", id))
    }

    fn bundle_path(&self, id: &EvaluationId) -> PathBuf {
        self.root.join(BUNDLES).join(format!("received_model_{}", id))
    }

    fn upload_dir(&self, id: &BundleId) -> PathBuf {
        self.root.join(UPLOADS).join(id.as_str())
    }

    fn result_path(&self, id: &EvaluationId) -> PathBuf {
        self.root.join(RESULTS).join(format!("results_{}.json", id))
    }

    async fn read_task(&self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        match read(&self.task_path(id)).await? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("corrupted task record")?,
            )),
            None => Ok(None),
        }
    }

    async fn write_task(&self, id: &EvaluationId, record: &TaskRecord) -> StorageResult<()> {
        write_atomic(&self.task_path(id), &serde_json::to_vec(record)?).await
    }
}

/// Reads a whole file. Returns `None` if it doesn't exist.
async fn read(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4()));
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("failed to write {}", path.display()));
    }
    Ok(())
}

async fn remove(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
    }
}

#[async_trait]
impl TaskStore for FsStore {
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate> {
        let _guard = self.tasks_lock.lock().await;
        if self.read_task(id).await?.is_some() {
            return Ok(TaskCreate(Err(TaskCreateError::AlreadyExists)));
        }
        self.write_task(id, record).await?;
        Ok(TaskCreate(Ok(())))
    }

    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        self.read_task(id).await
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
        let _guard = self.tasks_lock.lock().await;
        let outcome = match self.read_task(id).await? {
            None => Err(TaskTransitionError::UnknownTask),
            Some(current) if current.state.kind() != from => {
                Err(TaskTransitionError::StateMismatch)
            }
            Some(_) => {
                self.write_task(id, record).await?;
                Ok(())
            }
        };
        Ok(TaskTransition(outcome))
    }

    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool> {
        let _guard = self.tasks_lock.lock().await;
        match self.read_task(id).await? {
            Some(record) if record.state.kind() == StateKind::Pending => {
                remove(&self.task_path(id)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>> {
        let mut tasks = Vec::new();
        let mut entries = fs::read_dir(self.root.join(TASKS)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let id = match path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<EvaluationId>().ok())
            {
                Some(id) => id,
                None => {
                    warn!("ignoring unexpected file {}", path.display());
                    continue;
                }
            };
            if let Some(record) = self.read_task(&id).await? {
                tasks.push((id, record));
            }
        }
        Ok(tasks)
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        fs::metadata(self.root.as_path())
            .await
            .with_context(|| format!("{} is not accessible", self.root.display()))?;
        Ok(())
    }
}

#[async_trait]
impl BundleStore for FsStore {
    async fn put_bundle(&mut self, id: &EvaluationId, bundle: &ModelBundle) -> StorageResult<()> {
        write_atomic(&self.bundle_path(id), &bincode::serialize(bundle)?).await
    }

    async fn bundle(&mut self, id: &EvaluationId) -> StorageResult<Option<ModelBundle>> {
        match read(&self.bundle_path(id)).await? {
            Some(raw) => Ok(Some(
                bincode::deserialize(&raw).context("corrupted model bundle")?,
            )),
            None => Ok(None),
        }
    }

    async fn delete_bundle(&mut self, id: &EvaluationId) -> StorageResult<()> {
        remove(&self.bundle_path(id)).await
    }
}

#[async_trait]
impl UploadStore for FsStore {
    async fn put_upload(&mut self, bundle: &ModelBundle) -> StorageResult<BundleId> {
        let id = bundle.id();
        let dir = self.upload_dir(&id);
        for (role, file) in bundle.files() {
            let role_dir = dir.join(role.as_str());
            fs::create_dir_all(&role_dir)
                .await
                .with_context(|| format!("failed to create {}", role_dir.display()))?;
            write_atomic(&role_dir.join(&file.filename), &file.bytes).await?;
        }
        Ok(id)
    }

    async fn upload(&mut self, id: &BundleId) -> StorageResult<Option<ModelBundle>> {
        let dir = self.upload_dir(id);
        if read_dir_if_exists(&dir).await?.is_none() {
            return Ok(None);
        }

        let mut files = std::collections::BTreeMap::new();
        for role in FileRole::ALL.iter().copied() {
            let role_dir = dir.join(role.as_str());
            let mut entries = match read_dir_if_exists(&role_dir).await? {
                Some(entries) => entries,
                None => continue,
            };
            while let Some(entry) = entries.next_entry().await? {
                let filename = entry.file_name().to_string_lossy().into_owned();
                if filename.contains(".tmp-") {
                    continue;
                }
                let bytes = fs::read(entry.path()).await?;
                files.insert(role, ModelFile { filename, bytes });
                break;
            }
        }
        Ok(Some(ModelBundle::from_files(files)))
    }
}

async fn read_dir_if_exists(path: &Path) -> StorageResult<Option<fs::ReadDir>> {
    match fs::read_dir(path).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to list {}", path.display())),
    }
}

#[async_trait]
impl ResultStore for FsStore {
    async fn put_result(
        &mut self,
        id: &EvaluationId,
        result: &MetricsResult,
    ) -> StorageResult<()> {
        write_atomic(&self.result_path(id), &serde_json::to_vec_pretty(result)?).await
    }

    async fn result(&mut self, id: &EvaluationId) -> StorageResult<Option<MetricsResult>> {
        match read(&self.result_path(id)).await? {
            Some(raw) => Ok(Some(
                serde_json::from_slice(&raw).context("corrupted result")?,
            )),
            None => Ok(None),
        }
    }
}
