//! Persistent-store seam
//!
//! The pipeline only ever talks to the store through these traits: staging
//! inserts are autocommitted as rows are decoded, while promotion runs
//! inside an explicit transaction that either fully applies or fully rolls
//! back. Implementations must never partially apply work outside a commit.

use async_trait::async_trait;
use thiserror::Error;

use crate::record::{MasterRecord, StagingRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store-level failures. Escalated by the pipeline (wrapped as a pipeline
/// failure) so the enclosing transactional scope can roll back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Outbound interface to the persistent store.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Insert one staging row, durably, outside any caller transaction.
    async fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError>;

    /// Open a transactional scope for promotion.
    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

/// One open transaction against the store. Dropping without commit must
/// discard all work.
#[async_trait]
pub trait StoreTx: Send {
    /// All staging rows tagged with `upload_id`, in row order.
    async fn query_staging(&mut self, upload_id: &str) -> Result<Vec<StagingRecord>, StoreError>;

    /// Bulk-insert promoted rows.
    async fn insert_master(&mut self, records: &[MasterRecord]) -> Result<(), StoreError>;

    /// Bulk-delete the given staging rows; returns the number removed.
    async fn delete_staging(&mut self, records: &[StagingRecord]) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
