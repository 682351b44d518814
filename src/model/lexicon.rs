//! A linear bag-of-words classifier stored in the regular bundle layout.
//!
//! | role               | content                                                      |
//! | ------------------ | ------------------------------------------------------------ |
//! | `config`           | `{"num_labels": 2}`                                          |
//! | `model`            | `{"bias": [0.0, 0.1], "weights": {"pain": [0.0, 1.5], ...}}` |
//! | `tokenizer_config` | `{"lowercase": true}`                                        |
//! | `vocab`            | `{"pain": 0, "follow": 1, ...}`                              |
//! | `merges`           | required by the bundle layout, ignored                       |
//!
//! A text is split on non alphanumeric characters. Tokens outside of the vocabulary are dropped,
//! and the class scores are the bias plus the weights of the remaining tokens.

use std::collections::{HashMap, HashSet};

use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    bundle::{FileRole, ModelBundle},
    model::{ModelLoadError, ModelLoader, PredictError, Predictor},
};

/// The largest number of classes a lexicon model may declare.
pub const MAX_LABELS: usize = 1024;

#[derive(Deserialize)]
struct ModelConfig {
    num_labels: usize,
}

#[derive(Deserialize)]
struct TokenizerConfig {
    #[serde(default = "default_lowercase")]
    lowercase: bool,
}

fn default_lowercase() -> bool {
    true
}

#[derive(Deserialize)]
struct Weights {
    bias: Vec<f32>,
    #[serde(default)]
    weights: HashMap<String, Vec<f32>>,
}

#[derive(Clone, Copy, Debug, Default)]
/// Loads [`LexiconModel`]s.
pub struct LexiconLoader;

#[derive(Debug)]
pub struct LexiconModel {
    lowercase: bool,
    vocab: HashSet<String>,
    bias: Vec<f32>,
    weights: HashMap<String, Vec<f32>>,
}

fn parse<T: DeserializeOwned>(bundle: &ModelBundle, role: FileRole) -> Result<T, ModelLoadError> {
    let file = bundle.get(role).ok_or(ModelLoadError::MissingFile(role))?;
    serde_json::from_slice(&file.bytes).map_err(|e| ModelLoadError::Invalid {
        role,
        reason: e.to_string(),
    })
}

impl ModelLoader for LexiconLoader {
    fn load(&self, bundle: &ModelBundle) -> Result<Box<dyn Predictor>, ModelLoadError> {
        let config: ModelConfig = parse(bundle, FileRole::Config)?;
        let tokenizer: TokenizerConfig = parse(bundle, FileRole::TokenizerConfig)?;
        let vocab: HashMap<String, u64> = parse(bundle, FileRole::Vocab)?;
        let weights: Weights = parse(bundle, FileRole::Model)?;
        bundle
            .get(FileRole::Merges)
            .ok_or(ModelLoadError::MissingFile(FileRole::Merges))?;

        if config.num_labels == 0 || config.num_labels > MAX_LABELS {
            return Err(ModelLoadError::Invalid {
                role: FileRole::Config,
                reason: format!("num_labels must lie in 1..={}", MAX_LABELS),
            });
        }
        let invalid_shape = |what: &str, len: usize| ModelLoadError::Invalid {
            role: FileRole::Model,
            reason: format!(
                "{} has {} entries, expected {}",
                what, len, config.num_labels
            ),
        };
        if weights.bias.len() != config.num_labels {
            return Err(invalid_shape("bias", weights.bias.len()));
        }
        if let Some((token, w)) = weights
            .weights
            .iter()
            .find(|(_, w)| w.len() != config.num_labels)
        {
            return Err(invalid_shape(&format!("weight of {:?}", token), w.len()));
        }

        Ok(Box::new(LexiconModel {
            lowercase: tokenizer.lowercase,
            vocab: vocab.into_iter().map(|(token, _)| token).collect(),
            bias: weights.bias,
            weights: weights.weights,
        }))
    }
}

impl LexiconModel {
    fn tokenize<'a>(&self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        let lowercase = self.lowercase;
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(move |t| if lowercase { t.to_lowercase() } else { t.to_string() })
    }
}

impl Predictor for LexiconModel {
    fn scores(&self, text: &str) -> Result<Vec<f32>, PredictError> {
        let mut scores = self.bias.clone();
        for token in self.tokenize(text).filter(|t| self.vocab.contains(t)) {
            if let Some(weights) = self.weights.get(&token) {
                for (score, w) in scores.iter_mut().zip(weights) {
                    *score += w;
                }
            }
        }
        Ok(scores)
    }
}
