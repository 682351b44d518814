//! The fixed evaluation dataset owned by the evaluator.
//!
//! The dataset is a JSON array of labelled texts:
//!
//! ```text
//! [
//!     { "text": "patient reports chest pain", "label": 1 },
//!     { "text": "routine follow-up, no complaints", "label": 0 }
//! ]
//! ```

use std::{io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub text: String,
    pub label: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// An ordered list of labelled items. The order of the file is preserved.
pub struct Dataset {
    items: Vec<DatasetItem>,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read the dataset: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse the dataset: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Dataset {
    pub fn new(items: Vec<DatasetItem>) -> Self {
        Self { items }
    }

    /// Loads the dataset stored at `path`.
    ///
    /// Returns `Ok(None)` if there is no file at `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, DatasetError> {
        let path = path.as_ref();
        debug!("loading dataset from {}", path.display());
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let items: Vec<DatasetItem> = serde_json::from_slice(&raw)?;
        Ok(Some(Self { items }))
    }

    pub fn items(&self) -> &[DatasetItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
