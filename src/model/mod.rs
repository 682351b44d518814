//! The scoring capability used by the task runner.
//!
//! Turning a model bundle into something that can score text is framework specific. The task
//! runner only relies on the [`ModelLoader`] and [`Predictor`] traits; the evaluator binary ships
//! with the [`LexiconLoader`].

pub mod lexicon;

pub use self::lexicon::LexiconLoader;

use thiserror::Error;

use crate::bundle::{FileRole, ModelBundle};

/// Error returned when a bundle cannot be turned into a [`Predictor`].
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("the bundle has no {0} file")]
    MissingFile(FileRole),
    #[error("invalid {role} file: {reason}")]
    Invalid { role: FileRole, reason: String },
}

/// Error returned when a [`Predictor`] fails to score an input.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("the model produced no class scores")]
    NoClasses,
    #[error("inference failed: {0}")]
    Failed(String),
}

/// A loaded model together with its tokenizer/preprocessor.
pub trait Predictor: Send {
    /// Preprocesses `text` and returns one score per class.
    fn scores(&self, text: &str) -> Result<Vec<f32>, PredictError>;

    /// Returns the single highest scoring class for `text`.
    fn predict(&self, text: &str) -> Result<usize, PredictError> {
        argmax(&self.scores(text)?).ok_or(PredictError::NoClasses)
    }
}

/// Loads a scoreable [`Predictor`] out of a model bundle.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, bundle: &ModelBundle) -> Result<Box<dyn Predictor>, ModelLoadError>;
}

/// Index of the highest score. Ties go to the lowest index; `NaN`s never win.
pub fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &s)| match best {
            Some((_, b)) if b >= s => best,
            _ => Some((i, s)),
        })
        .map(|(i, _)| i)
}
