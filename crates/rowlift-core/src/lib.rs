//! Rowlift Core Library
//!
//! Streaming CSV ingestion, validation and promotion pipeline.
//!
//! # Overview
//!
//! Rowlift ingests large delimited text files (CSV, optionally bundled in a
//! ZIP archive), converts each row into typed records, validates them, and
//! commits valid records into persistent storage while surfacing per-row
//! error diagnostics and live progress to the caller.
//!
//! The flow for one upload:
//!
//! 1. [`decode::CsvDecoder`] turns bytes into typed candidate records with
//!    positional metadata, tolerating per-row conversion failures.
//! 2. [`validate::Validator`] applies declarative per-field rules.
//! 3. [`errors::ErrorAccumulator`] collects structured row errors with an
//!    early-stop cap.
//! 4. Valid rows are written to the staging table as they are decoded.
//! 5. On full-file success, [`migrate::Migrator`] promotes the staged rows
//!    into the permanent table inside one transaction and clears staging.
//!
//! The whole pipeline runs under a cooperative cancellation signal keyed by
//! an opaque upload id, owned by [`session::SessionRegistry`] and driven by
//! [`pipeline::UploadCoordinator`]. Progress milestones are relayed through
//! a fire-and-forget [`progress::ProgressSink`].

pub mod decode;
pub mod errors;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod session;
pub mod store;
pub mod validate;

// Re-export commonly used types
pub use errors::{ErrorAccumulator, UploadError, ValidationError};
pub use pipeline::{PipelineOptions, RowErrorPolicy, UploadCoordinator, UploadOutcome};
pub use record::{CandidateRecord, MasterRecord, StagingRecord};
pub use session::SessionRegistry;
