//! Model artifact bundles.
//!
//! A bundle is the set of files composing one model: its weights and the tokenizer/config
//! artifacts needed to score text with it. Five roles are required; a bundle missing any of them
//! is never submitted.

use std::{collections::BTreeMap, str::FromStr};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{common::BundleId, crypto};

/// Extensions accepted for uploaded model files.
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["json", "bin", "txt"];

/// The role a file plays in a model bundle.
#[derive(
    Clone, Copy, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    #[display(fmt = "config")]
    Config,
    #[display(fmt = "model")]
    Model,
    #[display(fmt = "tokenizer_config")]
    TokenizerConfig,
    #[display(fmt = "vocab")]
    Vocab,
    #[display(fmt = "merges")]
    Merges,
}

impl FileRole {
    /// All the roles a complete bundle carries, in submission order.
    pub const ALL: [FileRole; 5] = [
        FileRole::Config,
        FileRole::Model,
        FileRole::TokenizerConfig,
        FileRole::Vocab,
        FileRole::Merges,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::Config => "config",
            FileRole::Model => "model",
            FileRole::TokenizerConfig => "tokenizer_config",
            FileRole::Vocab => "vocab",
            FileRole::Merges => "merges",
        }
    }
}

impl FromStr for FileRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileRole::ALL
            .iter()
            .copied()
            .find(|role| role.as_str() == s)
            .ok_or(UnknownRole)
    }
}

#[derive(Debug, Error)]
#[error("unknown file role")]
pub struct UnknownRole;

#[derive(Debug, Error, PartialEq, Eq)]
/// Reasons for rejecting a model bundle.
pub enum BundleError {
    #[error("missing {0} file")]
    Incomplete(FileRole),
    #[error("the {0} file is empty")]
    Empty(FileRole),
    #[error("invalid file type for {role}: {filename}")]
    InvalidExtension { role: FileRole, filename: String },
    #[error("invalid file name for {role}: {filename}")]
    InvalidFilename { role: FileRole, filename: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A single file of a bundle.
pub struct ModelFile {
    /// The sanitized name of the file.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A file as submitted by the caller, before validation.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    /// The form field the file was submitted under, i.e. its role.
    pub field: String,
    /// The client-side file name, if any.
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
/// A mapping from file roles to file contents.
pub struct ModelBundle {
    files: BTreeMap<FileRole, ModelFile>,
}

impl ModelBundle {
    /// Builds a complete bundle out of uploaded files.
    ///
    /// Each role is checked in [`FileRole::ALL`] order and the first problem is reported. Files
    /// submitted under unknown fields are ignored.
    ///
    /// # Errors
    /// Fails if a role is missing or empty, or if its file name has an extension outside of
    /// [`ALLOWED_EXTENSIONS`] or loses it when sanitized.
    pub fn from_uploads(uploads: Vec<UploadedFile>) -> Result<Self, BundleError> {
        let mut by_field: BTreeMap<String, UploadedFile> = BTreeMap::new();
        for upload in uploads {
            if by_field.contains_key(&upload.field) {
                warn!("ignoring duplicate upload for field {}", upload.field);
                continue;
            }
            by_field.insert(upload.field.clone(), upload);
        }

        let mut files = BTreeMap::new();
        for role in FileRole::ALL.iter().copied() {
            let upload = by_field
                .remove(role.as_str())
                .ok_or(BundleError::Incomplete(role))?;
            let original = match upload.filename {
                Some(ref name) if !name.is_empty() => name.clone(),
                _ => return Err(BundleError::Incomplete(role)),
            };
            if !has_allowed_extension(&original) {
                return Err(BundleError::InvalidExtension {
                    role,
                    filename: original,
                });
            }
            let filename = sanitize_filename(&original)
                .filter(|sanitized| has_allowed_extension(sanitized))
                .ok_or_else(|| BundleError::InvalidFilename {
                    role,
                    filename: original.clone(),
                })?;
            if upload.bytes.is_empty() {
                return Err(BundleError::Empty(role));
            }
            files.insert(
                role,
                ModelFile {
                    filename,
                    bytes: upload.bytes,
                },
            );
        }
        Ok(Self { files })
    }

    /// Builds a bundle from already sanitized files without validating it.
    pub fn from_files(files: BTreeMap<FileRole, ModelFile>) -> Self {
        Self { files }
    }

    /// Checks that every required role is present and non-empty.
    pub fn validate(&self) -> Result<(), BundleError> {
        for role in FileRole::ALL.iter().copied() {
            match self.files.get(&role) {
                None => return Err(BundleError::Incomplete(role)),
                Some(file) if file.bytes.is_empty() => return Err(BundleError::Empty(role)),
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn get(&self, role: FileRole) -> Option<&ModelFile> {
        self.files.get(&role)
    }

    pub fn files(&self) -> &BTreeMap<FileRole, ModelFile> {
        &self.files
    }

    /// The sanitized file names in role order.
    pub fn filenames(&self) -> Vec<String> {
        self.files.values().map(|f| f.filename.clone()).collect()
    }

    /// Computes the content address of this bundle.
    ///
    /// The address covers the role, the file name and the contents of every file, so two uploads
    /// of identical files share an address.
    pub fn id(&self) -> BundleId {
        let mut digests = Vec::with_capacity(self.files.len() * 2 * 32);
        for (role, file) in &self.files {
            digests.extend_from_slice(&crypto::sha256(role.as_str().as_bytes()));
            digests.extend_from_slice(&crypto::sha256(file.filename.as_bytes()));
            digests.extend_from_slice(&crypto::sha256(&file.bytes));
        }
        BundleId::from_digest(&crypto::sha256(&digests))
    }
}

/// Checks the extension after the last dot against [`ALLOWED_EXTENSIONS`], ignoring case.
pub fn has_allowed_extension(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.iter().any(|allowed| *allowed == ext)
        }
        None => false,
    }
}

/// Turns a client supplied file name into one that is safe to store on disk.
///
/// Path separators and whitespace become `_`, every character outside of `[A-Za-z0-9._-]` is
/// dropped and leading dots and underscores are stripped. Returns `None` if nothing is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let replaced: String = filename
        .chars()
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = replaced.split_whitespace().collect::<Vec<_>>().join("_");
    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let trimmed = filtered.trim_start_matches(|c| c == '.' || c == '_');
    let trimmed = trimmed.trim_end_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
