// src/error.rs

use thiserror::Error;

use crate::models::EmployerFields;

/// Domain failures that callers may need to tell apart from plain I/O errors.
/// Everything else travels as `anyhow::Error`; use `downcast_ref::<ResolutionError>()`
/// to detect these.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// More than one canonical employer carries the same identity tuple.
    /// Never resolved automatically; the rows must be repaired by hand.
    #[error("found {count} canonical employers matching {fields:?}; manual repair required")]
    DuplicateCanonicalEntity { fields: EmployerFields, count: usize },

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("employer records not found: {0:?}")]
    MissingRecords(Vec<i64>),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ResolutionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ResolutionError::DuplicateCanonicalEntity { .. })
    }
}
