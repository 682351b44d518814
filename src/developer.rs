//! The developer coordinator, run by the model developer.
//!
//! It stores uploaded model bundles, ships them sealed to the evaluator and keeps the sealed
//! results the evaluator sends back.

use serde::Serialize;
use thiserror::Error;

use crate::{
    bundle::{BundleError, ModelBundle, UploadedFile},
    client::{EvaluatorApi, TransportError},
    common::{BundleId, EvaluationId},
    crypto::{self, CodecError, SharedKey},
    metrics::MetricsResult,
    request::{EvaluationRequest, EvaluationResults},
    storage::{ResultStore, StorageError, UploadStore},
};

/// Errors of the developer coordinator.
#[derive(Debug, Error)]
pub enum DeveloperError {
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("unknown model bundle {0}")]
    BundleNotFound(BundleId),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("the results belong to evaluation {payload}, not {header}")]
    IdMismatch {
        header: EvaluationId,
        payload: EvaluationId,
    },
    #[error("the results are out of bounds")]
    InvalidResults,
    #[error("results for evaluation {0} not found")]
    NotFound(EvaluationId),
    #[error("failed to reach the evaluator: {0}")]
    Transport(#[from] TransportError),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
/// A handle on an uploaded bundle.
pub struct BundleReference {
    pub bundle_id: BundleId,
    /// The stored file names, in role order.
    pub files: Vec<String>,
}

/// The developer coordinator.
pub struct Developer<S, C> {
    store: S,
    client: C,
    key: SharedKey,
}

impl<S, C> Developer<S, C>
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    pub fn new(store: S, client: C, key: SharedKey) -> Self {
        Self { store, client, key }
    }

    /// Validates and stores a set of uploaded files as a model bundle.
    ///
    /// # Errors
    /// Fails with [`DeveloperError::Bundle`] if a role is missing or a file is unusable.
    pub async fn upload_model_bundle(
        &self,
        files: Vec<UploadedFile>,
    ) -> Result<BundleReference, DeveloperError> {
        let bundle = ModelBundle::from_uploads(files)?;
        let bundle_id = self.store.clone().put_upload(&bundle).await?;
        info!("stored model bundle {}", bundle_id);
        Ok(BundleReference {
            bundle_id,
            files: bundle.filenames(),
        })
    }

    /// Seals an uploaded bundle under a fresh evaluation id and hands it to the evaluator.
    ///
    /// The id is only returned once the evaluator accepted the request.
    ///
    /// # Errors
    /// - [`DeveloperError::BundleNotFound`] if no bundle was uploaded under `bundle_id`.
    /// - [`DeveloperError::Bundle`] if the stored bundle lacks a file.
    /// - [`DeveloperError::Transport`] if the evaluator could not be reached or refused.
    pub async fn initiate_evaluation(
        &self,
        bundle_id: &BundleId,
    ) -> Result<EvaluationId, DeveloperError> {
        let bundle = self
            .store
            .clone()
            .upload(bundle_id)
            .await?
            .ok_or_else(|| DeveloperError::BundleNotFound(bundle_id.clone()))?;
        bundle.validate()?;

        let id = EvaluationId::new();
        let payload = crypto::encrypt(&EvaluationRequest::new(id, bundle), &self.key)?;
        self.client.send_model(id, payload).await?;
        info!("evaluation {} of bundle {} initiated", id, bundle_id);
        Ok(id)
    }

    /// Opens and stores the sealed results of an evaluation.
    ///
    /// Receiving the same results again overwrites them with identical content.
    ///
    /// # Errors
    /// - [`DeveloperError::Codec`] if the payload is not authentic or not a result.
    /// - [`DeveloperError::IdMismatch`] if `id` differs from the id sealed in the payload.
    /// - [`DeveloperError::InvalidResults`] if a score lies outside of `[0, 1]`.
    pub async fn receive_results(
        &self,
        id: EvaluationId,
        payload: &[u8],
    ) -> Result<(), DeveloperError> {
        let results: EvaluationResults = crypto::decrypt(payload, &self.key)?;
        if results.evaluation_id != id {
            return Err(DeveloperError::IdMismatch {
                header: id,
                payload: results.evaluation_id,
            });
        }
        if !results.metrics.is_bounded() {
            return Err(DeveloperError::InvalidResults);
        }
        self.store.clone().put_result(&id, &results.metrics).await?;
        info!("received results of evaluation {}", id);
        Ok(())
    }

    /// Returns the stored results of an evaluation.
    pub async fn get_results(&self, id: EvaluationId) -> Result<MetricsResult, DeveloperError> {
        self.store
            .clone()
            .result(&id)
            .await?
            .ok_or(DeveloperError::NotFound(id))
    }
}
