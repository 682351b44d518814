//! The payloads exchanged between the model developer and the data owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{bundle::ModelBundle, common::EvaluationId, metrics::MetricsResult};

/// The HTTP header carrying the evaluation identifier next to an encrypted payload.
pub const EVALUATION_ID_HEADER: &str = "Evaluation-ID";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// A request to evaluate a model bundle. Only ever sent sealed under the shared key.
///
/// The evaluation id is repeated inside the sealed payload: a receiver rejects a request whose
/// header disagrees with it.
pub struct EvaluationRequest {
    pub evaluation_id: EvaluationId,
    pub bundle: ModelBundle,
    pub created_at: DateTime<Utc>,
}

impl EvaluationRequest {
    pub fn new(evaluation_id: EvaluationId, bundle: ModelBundle) -> Self {
        Self {
            evaluation_id,
            bundle,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// The anonymized outcome of an evaluation, sent back to the model developer sealed under the
/// shared key.
pub struct EvaluationResults {
    pub evaluation_id: EvaluationId,
    pub metrics: MetricsResult,
}
