use std::path::PathBuf;

use thiserror::Error;

use crate::normalizer::NormalizeError;

/// Failures of Portfolio Store operations.
///
/// Validation variants are returned before anything on disk changes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid folder key '{key}' (expected {tag}<number>)")]
    InvalidFolderKey { key: String, tag: String },

    #[error("no files with an accepted extension ({accepted}) were uploaded")]
    NoAcceptedFiles { accepted: String },

    #[error("file '{file_name}' does not follow the naming convention (<number>.<{accepted}>)")]
    NamingConvention { file_name: String, accepted: String },

    #[error("more than one file maps to image number {number}")]
    DuplicateNumber { number: u64 },

    #[error("image numbers must be contiguous; missing {}", join_numbers(.missing))]
    MissingNumbers { missing: Vec<u64> },

    #[error("no identifier left after {highest}")]
    IdentifiersExhausted { highest: u64 },

    #[error("portfolio '{key}' not found")]
    NotFound { key: String },

    #[error("ledger {path}: {reason}")]
    Ledger { path: PathBuf, reason: String },

    #[error("normalizing {path}: {source}")]
    Normalize {
        path: PathBuf,
        #[source]
        source: NormalizeError,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors raised by input validation, before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidFolderKey { .. }
                | StoreError::NoAcceptedFiles { .. }
                | StoreError::NamingConvention { .. }
                | StoreError::DuplicateNumber { .. }
                | StoreError::MissingNumbers { .. }
        )
    }
}

fn join_numbers(numbers: &[u64]) -> String {
    numbers
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, StoreError>;
