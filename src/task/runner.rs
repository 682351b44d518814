//! Execution of evaluation tasks.
//!
//! The runner takes evaluation ids off the task queue and processes each in its own tokio task,
//! with at most `workers` evaluations running at once. Model loading and inference are CPU bound
//! and run on the blocking thread pool.

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tracing_futures::Instrument;

use crate::{
    client::{with_retries, DeveloperApi, RetryPolicy},
    common::EvaluationId,
    crypto::{self, SharedKey},
    dataset::Dataset,
    metrics::{calculate_metrics, MetricsResult},
    model::ModelLoader,
    request::EvaluationResults,
    storage::{BundleStore, StorageResult, TaskStore},
    task::{queue::TaskReceiver, FailureReason, StateKind, TaskState},
};

/// Retries of the write that moves a task into its terminal state.
const OUTCOME_WRITES: RetryPolicy = RetryPolicy {
    retries: 3,
    backoff: Duration::from_millis(100),
};

/// Why scoring a model stopped short of metrics.
struct Failure {
    reason: FailureReason,
    error: String,
}

impl Failure {
    fn new(reason: FailureReason, error: impl ToString) -> Self {
        Self {
            reason,
            error: error.to_string(),
        }
    }
}

/// Runs evaluation tasks.
pub struct TaskRunner<S, C> {
    store: S,
    client: C,
    loader: Arc<dyn ModelLoader>,
    key: SharedKey,
    dataset: PathBuf,
    workers: usize,
    delivery: RetryPolicy,
}

impl<S, C> TaskRunner<S, C>
where
    S: TaskStore + BundleStore,
    C: DeveloperApi,
{
    pub fn new(
        store: S,
        client: C,
        loader: Arc<dyn ModelLoader>,
        key: SharedKey,
        dataset: PathBuf,
        workers: usize,
        delivery: RetryPolicy,
    ) -> Self {
        Self {
            store,
            client,
            loader,
            key,
            dataset,
            workers: workers.max(1),
            delivery,
        }
    }

    /// Processes the queued evaluations until every sender of the queue is dropped.
    pub async fn run(self, mut queue: TaskReceiver) {
        let workers = Arc::new(Semaphore::new(self.workers));
        let runner = Arc::new(self);
        while let Some(id) = queue.next().await {
            let permit = match workers.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let runner = runner.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = runner.evaluate(id).await {
                        error!("evaluation aborted: {:#}", e);
                    }
                    drop(permit);
                }
                .instrument(error_span!("evaluation", evaluation_id = %id)),
            );
        }
        info!("task queue closed");
    }

    /// Runs a single evaluation from `Pending` to a terminal state.
    ///
    /// Returns the terminal state, or `None` if the task was not pending and thus left alone.
    pub async fn evaluate(&self, id: EvaluationId) -> StorageResult<Option<TaskState>> {
        let mut store = self.store.clone();
        let pending = match store.task(&id).await? {
            Some(record) => record,
            None => {
                warn!("no task record, skipping");
                return Ok(None);
            }
        };
        let running = pending.advance(TaskState::Running);
        if let Err(e) = store
            .transition(&id, StateKind::Pending, &running)
            .await?
            .into_inner()
        {
            debug!("task was not picked up: {}", e);
            return Ok(None);
        }
        info!("evaluation started");

        let (state, result) = match self.score(&mut store, &id).await {
            Ok(metrics) => {
                let result = metrics.anonymize();
                match self.deliver(id, result).await {
                    Ok(()) => (TaskState::Succeeded { result }, Some(result)),
                    Err(e) => (TaskState::failed(FailureReason::DeliveryError, e), Some(result)),
                }
            }
            Err(failure) => (TaskState::failed(failure.reason, failure.error), None),
        };

        let mut finished = running.advance(state);
        if result.is_some() {
            finished.result = result;
        }
        let outcome = &finished;
        let recorded = with_retries(OUTCOME_WRITES, || {
            let mut store = store.clone();
            async move { store.transition(&id, StateKind::Running, outcome).await }
        })
        .await;
        let transition = match recorded {
            Ok(transition) => transition,
            Err(e) => {
                error!(
                    "failed to record the outcome, the task stays running until a restart: {:#}",
                    e
                );
                return Err(e);
            }
        };
        if let Err(e) = transition.into_inner() {
            warn!("failed to record the outcome: {}", e);
            return Ok(None);
        }

        match &finished.state {
            TaskState::Failed { reason, error } => warn!("evaluation failed ({}): {}", reason, error),
            _ => info!("evaluation succeeded"),
        }
        Ok(Some(finished.state))
    }

    async fn score(&self, store: &mut S, id: &EvaluationId) -> Result<MetricsResult, Failure> {
        let bundle = match store.bundle(id).await {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                return Err(Failure::new(
                    FailureReason::MissingArtifact,
                    "the model bundle is missing",
                ))
            }
            Err(e) => {
                return Err(Failure::new(
                    FailureReason::MissingArtifact,
                    format!("failed to read the model bundle: {}", e),
                ))
            }
        };
        let dataset = match Dataset::load(&self.dataset).await {
            Ok(Some(dataset)) => dataset,
            Ok(None) => {
                return Err(Failure::new(
                    FailureReason::MissingArtifact,
                    format!("no evaluation dataset at {}", self.dataset.display()),
                ))
            }
            Err(e) => return Err(Failure::new(FailureReason::MissingArtifact, e)),
        };
        debug!("scoring {} dataset items", dataset.len());

        let loader = self.loader.clone();
        let scoring = tokio::task::spawn_blocking(move || {
            let predictor = loader
                .load(&bundle)
                .map_err(|e| Failure::new(FailureReason::ModelLoadError, e))?;
            let predictions = dataset
                .items()
                .iter()
                .map(|item| predictor.predict(&item.text))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Failure::new(FailureReason::Scoring, e))?;
            let labels: Vec<_> = dataset.items().iter().map(|item| item.label).collect();
            calculate_metrics(&predictions, &labels)
                .map_err(|e| Failure::new(FailureReason::Scoring, e))
        });
        match scoring.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Failure::new(
                FailureReason::Scoring,
                format!("the scoring worker stopped: {}", e),
            )),
        }
    }

    async fn deliver(&self, id: EvaluationId, metrics: MetricsResult) -> Result<(), String> {
        let results = EvaluationResults {
            evaluation_id: id,
            metrics,
        };
        let payload = crypto::encrypt(&results, &self.key).map_err(|e| e.to_string())?;
        let client = &self.client;
        with_retries(self.delivery, || client.send_results(id, payload.clone()))
            .await
            .map_err(|e| e.to_string())
    }
}
