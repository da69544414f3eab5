//! In-memory store
//!
//! Keeps staging and master tables in process memory with snapshot
//! transactions: `begin` clones the tables, mutations apply to the clone,
//! and `commit` swaps it back (last commit wins). Used by the pipeline
//! integration tests and by store-less deployments of the coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{StoreError, StoreTx, UploadStore};
use crate::record::{MasterRecord, StagingRecord};

#[derive(Debug, Default, Clone)]
struct Tables {
    staging: Vec<StagingRecord>,
    master: Vec<MasterRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next_master_insert: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn staging_rows(&self) -> Vec<StagingRecord> {
        self.lock().staging.clone()
    }

    pub fn master_rows(&self) -> Vec<MasterRecord> {
        self.lock().master.clone()
    }

    /// Make the next `insert_master` call fail, for rollback tests.
    pub fn fail_next_master_insert(&self) {
        self.fail_next_master_insert.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError> {
        self.lock().staging.push(record.clone());
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let scratch = self.lock().clone();
        Ok(Box::new(MemTx {
            store: self,
            scratch,
        }))
    }
}

struct MemTx<'a> {
    store: &'a MemoryStore,
    scratch: Tables,
}

#[async_trait]
impl StoreTx for MemTx<'_> {
    async fn query_staging(&mut self, upload_id: &str) -> Result<Vec<StagingRecord>, StoreError> {
        let mut rows: Vec<StagingRecord> = self
            .scratch
            .staging
            .iter()
            .filter(|r| r.upload_id == upload_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.row_number);
        Ok(rows)
    }

    async fn insert_master(&mut self, records: &[MasterRecord]) -> Result<(), StoreError> {
        if self.store.fail_next_master_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend(
                "injected master insert failure".to_string(),
            ));
        }
        self.scratch.master.extend_from_slice(records);
        Ok(())
    }

    async fn delete_staging(&mut self, records: &[StagingRecord]) -> Result<u64, StoreError> {
        let keys: Vec<(&str, i64)> = records
            .iter()
            .map(|r| (r.upload_id.as_str(), r.row_number))
            .collect();
        let before = self.scratch.staging.len();
        self.scratch
            .staging
            .retain(|r| !keys.contains(&(r.upload_id.as_str(), r.row_number)));
        Ok((before - self.scratch.staging.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        *self.store.lock() = self.scratch;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn staged(upload_id: &str, row_number: i64) -> StagingRecord {
        StagingRecord {
            upload_id: upload_id.to_string(),
            row_number,
            name: format!("row-{row_number}"),
            description: "d".to_string(),
            kind: "basic".to_string(),
            internet_id: row_number,
            created_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        }
    }

    #[tokio::test]
    async fn uncommitted_transactions_leave_no_trace() {
        let store = MemoryStore::new();
        store.insert_staging(&staged("u1", 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let rows = tx.query_staging("u1").await.unwrap();
        tx.insert_master(&[MasterRecord::from(rows[0].clone())])
            .await
            .unwrap();
        tx.delete_staging(&rows).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.staging_rows().len(), 1);
        assert!(store.master_rows().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_all_work() {
        let store = MemoryStore::new();
        store.insert_staging(&staged("u1", 1)).await.unwrap();
        store.insert_staging(&staged("u1", 2)).await.unwrap();
        store.insert_staging(&staged("other", 1)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let rows = tx.query_staging("u1").await.unwrap();
        assert_eq!(rows.len(), 2);
        let promoted: Vec<MasterRecord> = rows.iter().cloned().map(MasterRecord::from).collect();
        tx.insert_master(&promoted).await.unwrap();
        assert_eq!(tx.delete_staging(&rows).await.unwrap(), 2);
        tx.commit().await.unwrap();

        assert_eq!(store.master_rows().len(), 2);
        assert_eq!(store.staging_rows().len(), 1);
        assert_eq!(store.staging_rows()[0].upload_id, "other");
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_next_master_insert();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_master(&[]).await.is_err());
        assert!(tx.insert_master(&[]).await.is_ok());
    }
}
