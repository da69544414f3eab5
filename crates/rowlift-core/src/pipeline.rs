//! Cancellable upload coordinator
//!
//! Owns the decode → validate → stage pipeline for one upload at a time,
//! driven under a cooperative cancellation signal registered in the shared
//! [`SessionRegistry`]. Archive inputs fan out to every embedded CSV entry
//! sequentially, under the same signal and upload id, so row order and
//! cumulative progress stay deterministic within one upload.

use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::decode::CsvDecoder;
use crate::errors::{ErrorAccumulator, UploadError, ValidationError};
use crate::migrate::{MigrationReport, Migrator, RecordPredicate};
use crate::progress::{
    ProgressEvent, ProgressSink, PROGRESS_COMPLETE, PROGRESS_DISPATCHED,
};
use crate::record::{CandidateRecord, StagingRecord};
use crate::session::SessionRegistry;
use crate::store::UploadStore;
use crate::validate::{master_rules, Validator};

/// What to do when a row cannot be converted into a typed record.
///
/// `SkipAndRecord` reports the row through the error list and keeps going,
/// matching the accumulator-with-cap model. `AbortFile` makes the first
/// conversion failure fatal to the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowErrorPolicy {
    #[default]
    SkipAndRecord,
    AbortFile,
}

/// Tunables for one coordinator instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    pub decoder: CsvDecoder,
    pub row_error_policy: RowErrorPolicy,
}

/// Result object returned to the caller for one upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub upload_id: String,
    pub is_success: bool,
    pub rows_staged: usize,
    pub errors: Vec<ValidationError>,
}

/// Drives the full ingestion pipeline for uploads, one logical pipeline per
/// call; concurrent uploads share only the session registry.
pub struct UploadCoordinator {
    store: Arc<dyn UploadStore>,
    registry: Arc<SessionRegistry>,
    progress: Arc<dyn ProgressSink>,
    validator: Validator<CandidateRecord>,
    options: PipelineOptions,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn UploadStore>,
        registry: Arc<SessionRegistry>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            store,
            registry,
            progress,
            validator: master_rules(),
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_validator(mut self, validator: Validator<CandidateRecord>) -> Self {
        self.validator = validator;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Decode, validate and stage one uploaded file (CSV or ZIP of CSVs)
    /// without promoting. Registers a fresh cancellation signal for
    /// `upload_id` (overwriting any prior one) and deregisters it on every
    /// exit path.
    #[tracing::instrument(skip(self, bytes), fields(upload_id = %upload_id, file_name = %file_name))]
    pub async fn begin_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        upload_id: &str,
    ) -> Result<UploadOutcome, UploadError> {
        check_input(file_name, bytes)?;
        let token = self.registry.register(upload_id);
        let result = self.stage_file(file_name, bytes, upload_id, &token).await;
        self.registry.remove(upload_id);
        result
    }

    /// The full upload flow: stage, then promote staged rows and clear
    /// staging when the file produced zero errors. The cancellation
    /// signal stays registered across promotion so its checkpoints observe
    /// a live cancel.
    #[tracing::instrument(skip(self, bytes), fields(upload_id = %upload_id, file_name = %file_name))]
    pub async fn run(
        &self,
        file_name: &str,
        bytes: &[u8],
        upload_id: &str,
    ) -> Result<UploadOutcome, UploadError> {
        check_input(file_name, bytes)?;
        let token = self.registry.register(upload_id);
        let result = self.run_inner(file_name, bytes, upload_id, &token).await;
        self.registry.remove(upload_id);
        result
    }

    async fn run_inner(
        &self,
        file_name: &str,
        bytes: &[u8],
        upload_id: &str,
        token: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let outcome = self.stage_file(file_name, bytes, upload_id, token).await?;
        self.progress
            .publish(ProgressEvent::Percent(PROGRESS_DISPATCHED));

        if !outcome.is_success {
            // Validation failures prevent promotion; staged rows are left
            // behind for operator diagnosis.
            warn!(
                errors = outcome.errors.len(),
                rows_staged = outcome.rows_staged,
                "upload finished with validation errors; skipping promotion"
            );
            return Ok(outcome);
        }

        let migrator = Migrator::new(self.store.as_ref(), self.progress.as_ref());
        migrator.migrate(upload_id, None, token).await?;
        self.progress
            .publish(ProgressEvent::Percent(PROGRESS_COMPLETE));
        Ok(outcome)
    }

    /// Promote staged rows for `upload_id`, optionally narrowed by a
    /// predicate over staging fields. Uses the session's live cancellation
    /// signal when one is still registered.
    pub async fn migrate(
        &self,
        upload_id: &str,
        predicate: Option<&RecordPredicate>,
    ) -> Result<MigrationReport, UploadError> {
        let token = self.registry.get(upload_id).unwrap_or_default();
        Migrator::new(self.store.as_ref(), self.progress.as_ref())
            .migrate(upload_id, predicate, &token)
            .await
    }

    /// Trip the cancellation signal for a running upload.
    pub fn cancel_upload(&self, upload_id: &str) -> Result<(), UploadError> {
        self.registry.cancel(upload_id)
    }

    async fn stage_file(
        &self,
        file_name: &str,
        bytes: &[u8],
        upload_id: &str,
        token: &CancellationToken,
    ) -> Result<UploadOutcome, UploadError> {
        let mut acc = ErrorAccumulator::new();
        let mut rows_staged = 0usize;

        match extension_of(file_name).as_deref() {
            Some("zip") => {
                self.stage_archive(bytes, upload_id, token, &mut acc, &mut rows_staged)
                    .await?
            },
            Some("csv") => {
                self.stage_csv(bytes, upload_id, token, &mut acc, &mut rows_staged)
                    .await?
            },
            _ => {
                return Err(UploadError::InvalidInput(format!(
                    "unsupported file type: {file_name}"
                )))
            },
        }

        let errors = acc.into_errors();
        let outcome = UploadOutcome {
            upload_id: upload_id.to_string(),
            is_success: errors.is_empty(),
            rows_staged,
            errors,
        };
        info!(
            rows_staged = outcome.rows_staged,
            errors = outcome.errors.len(),
            "staging finished"
        );
        Ok(outcome)
    }

    /// Extract the archive in memory and run every `.csv` entry through the
    /// single-file path, sequentially, under the same signal and id.
    async fn stage_archive(
        &self,
        bytes: &[u8],
        upload_id: &str,
        token: &CancellationToken,
        acc: &mut ErrorAccumulator,
        rows_staged: &mut usize,
    ) -> Result<(), UploadError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .context("failed to open zip archive")
            .map_err(UploadError::Pipeline)?;

        for index in 0..archive.len() {
            if token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            // Scope the (non-Send) zip entry so it is out of the generator
            // state before the await below; a plain `drop` is not enough for
            // the compiler's Send analysis.
            let (name, contents) = {
                let mut entry = archive
                    .by_index(index)
                    .context("failed to read zip entry")
                    .map_err(UploadError::Pipeline)?;
                let name = entry.name().to_string();
                if !name.to_lowercase().ends_with(".csv") {
                    continue;
                }

                let mut contents = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut contents)
                    .with_context(|| format!("failed to extract zip entry {name}"))
                    .map_err(UploadError::Pipeline)?;
                (name, contents)
            };

            self.stage_csv(&contents, upload_id, token, acc, rows_staged)
                .await?;
            if acc.has_reached_limit() {
                break;
            }
            self.progress
                .publish(ProgressEvent::Message(format!("finished {name}")));
        }
        Ok(())
    }

    /// Decode one CSV buffer and insert valid rows into staging as they are
    /// decoded, checking the cancellation signal before and after each row.
    async fn stage_csv(
        &self,
        bytes: &[u8],
        upload_id: &str,
        token: &CancellationToken,
        acc: &mut ErrorAccumulator,
        rows_staged: &mut usize,
    ) -> Result<(), UploadError> {
        let decoded = self
            .options
            .decoder
            .decode(bytes)
            .map_err(|e| UploadError::Pipeline(anyhow::Error::new(e)))?;
        let total = decoded.row_count();
        let mut last_percent = 0u8;

        for (row_number, parsed) in decoded.rows() {
            if token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let record = match parsed {
                Ok(record) => record,
                Err(row_error) => match self.options.row_error_policy {
                    RowErrorPolicy::SkipAndRecord => {
                        acc.push(row_error.into_validation_error());
                        if acc.has_reached_limit() {
                            return Ok(());
                        }
                        continue;
                    },
                    RowErrorPolicy::AbortFile => {
                        return Err(UploadError::Pipeline(anyhow::anyhow!(
                            "row {}, field {}: {} ({})",
                            row_error.row_number,
                            row_error.field.as_deref().unwrap_or("-"),
                            row_error.message,
                            row_error.category.as_str(),
                        )));
                    },
                },
            };

            let row_errors = self.validator.validate(&record, row_number);
            if !row_errors.is_empty() {
                for error in row_errors {
                    acc.push(error);
                }
                if acc.has_reached_limit() {
                    return Ok(());
                }
                continue;
            }

            let staged = StagingRecord::new(record, upload_id, row_number as i64);
            self.store.insert_staging(&staged).await?;
            *rows_staged += 1;

            if token.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            if total > 0 {
                let percent = ((row_number as usize * 100) / total).min(100) as u8;
                if percent > last_percent {
                    last_percent = percent;
                    self.progress.publish(ProgressEvent::Percent(percent));
                }
            }
        }
        Ok(())
    }
}

fn check_input(file_name: &str, bytes: &[u8]) -> Result<(), UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::InvalidInput(
            "uploaded file is empty".to_string(),
        ));
    }
    if file_name.trim().is_empty() {
        return Err(UploadError::InvalidInput(
            "file name is required".to_string(),
        ));
    }
    Ok(())
}

fn extension_of(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}
