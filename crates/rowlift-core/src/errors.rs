//! Error taxonomy and the bounded error accumulator
//!
//! Validation errors are data, never exceptions: they are collected per row
//! and returned to the caller as a structured list capped at
//! [`ERROR_CAP`] entries. Everything else surfaces through [`UploadError`],
//! whose variants map one-to-one onto the caller-visible failure classes
//! (invalid-input, unknown-upload, operation-cancelled, pipeline-failure).

use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Hard cap on accumulated validation errors per unit of work. Reaching the
/// cap aborts the current file's decode loop early.
pub const ERROR_CAP: usize = 100;

/// Field name used when an error cannot be attributed to a column.
pub const UNATTRIBUTED_FIELD: &str = "-";

/// One structured, per-row validation failure. Informational only; returned
/// to the caller, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub row_number: u64,
    pub message: String,
    pub field_name: String,
}

impl ValidationError {
    pub fn new(row_number: u64, message: impl Into<String>) -> Self {
        Self {
            row_number,
            message: message.into(),
            field_name: UNATTRIBUTED_FIELD.to_string(),
        }
    }

    pub fn with_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }
}

/// Append-only list of validation errors with an early-stop threshold.
///
/// Reaching the cap is a control signal, not itself an error: the caller
/// must stop feeding rows and treat the partial accumulation as the final
/// error set for the current unit of work.
#[derive(Debug)]
pub struct ErrorAccumulator {
    errors: Vec<ValidationError>,
    cap: usize,
}

impl Default for ErrorAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::with_cap(ERROR_CAP)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            errors: Vec::new(),
            cap,
        }
    }

    /// Append an error. Entries past the cap are discarded; callers are
    /// expected to consult [`Self::has_reached_limit`] after every push and
    /// stop feeding rows once it trips.
    pub fn push(&mut self, error: ValidationError) {
        if self.errors.len() < self.cap {
            self.errors.push(error);
        }
    }

    pub fn has_reached_limit(&self) -> bool {
        self.errors.len() >= self.cap
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }
}

/// Caller-visible failure classes for upload operations.
///
/// The boundary layer maps these onto transport responses; anything that is
/// not invalid input, an unknown id or a cancellation is wrapped as a
/// pipeline failure carrying the original cause.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown upload id: {0}")]
    UnknownUpload(String),

    #[error("upload was cancelled")]
    Cancelled,

    #[error("pipeline failure: {0}")]
    Pipeline(#[from] anyhow::Error),
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        UploadError::Pipeline(anyhow::Error::new(err))
    }
}
