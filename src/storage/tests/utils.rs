use crate::{
    bundle::{tests::complete_uploads, ModelBundle},
    metrics::MetricsResult,
};

pub fn sample_bundle() -> ModelBundle {
    ModelBundle::from_uploads(complete_uploads()).unwrap()
}

pub fn metrics() -> MetricsResult {
    MetricsResult {
        accuracy: 0.75,
        precision: 0.78,
        recall: 0.83,
        f1_score: 0.76,
        samples: 4,
    }
}
