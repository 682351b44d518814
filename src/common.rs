use std::{convert::TryFrom, str::FromStr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Copy, Clone, Display, Serialize, Deserialize)]
/// A unique random identifier correlating one model evaluation across both parties.
pub struct EvaluationId(Uuid);

impl EvaluationId {
    /// Returns a new random evaluation identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for EvaluationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Eq, PartialEq, Hash, Debug, Clone, Display, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// A content address of an uploaded model bundle (hex encoded SHA-256).
pub struct BundleId(String);

impl BundleId {
    /// Length of the hex encoded digest.
    pub const LENGTH: usize = 64;

    /// Wraps a hex encoded digest.
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BundleId {
    type Err = InvalidBundleId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::LENGTH && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(InvalidBundleId)
        }
    }
}

impl TryFrom<String> for BundleId {
    type Error = InvalidBundleId;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BundleId> for String {
    fn from(id: BundleId) -> Self {
        id.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid bundle identifier")]
pub struct InvalidBundleId;
