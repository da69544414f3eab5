//! Staging-then-promotion migrator
//!
//! Moves validated staging rows into the permanent table atomically, then
//! clears staging. The whole call runs inside one store transaction: any
//! failure (or a tripped cancellation signal) rolls everything back and
//! surfaces to the caller; nothing is ever partially promoted or silently
//! swallowed.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::UploadError;
use crate::progress::{ProgressEvent, ProgressSink, PROGRESS_PROMOTED};
use crate::record::{MasterRecord, StagingRecord};
use crate::store::{StoreTx, UploadStore};

/// Caller-supplied narrowing predicate over staging rows.
pub type RecordPredicate = Box<dyn Fn(&StagingRecord) -> bool + Send + Sync>;

/// What one migrate call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub promoted: usize,
    pub staging_deleted: u64,
}

pub struct Migrator<'a> {
    store: &'a dyn UploadStore,
    progress: &'a dyn ProgressSink,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a dyn UploadStore, progress: &'a dyn ProgressSink) -> Self {
        Self { store, progress }
    }

    /// Promote all staging rows tagged with `upload_id` (optionally narrowed
    /// by `predicate`) into the permanent table and delete them from
    /// staging, all-or-nothing.
    ///
    /// Calling again with no new staging rows is a no-op.
    #[tracing::instrument(skip(self, predicate, cancel), fields(upload_id = %upload_id))]
    pub async fn migrate(
        &self,
        upload_id: &str,
        predicate: Option<&RecordPredicate>,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, UploadError> {
        let mut tx = self.store.begin().await?;
        match self.promote_in_tx(&mut *tx, upload_id, predicate, cancel).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    promoted = report.promoted,
                    staging_deleted = report.staging_deleted,
                    "promotion committed"
                );
                Ok(report)
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    // The original failure is the one the caller needs.
                    error!(error = %rollback_err, "rollback after failed promotion also failed");
                }
                Err(err)
            },
        }
    }

    async fn promote_in_tx(
        &self,
        tx: &mut (dyn StoreTx + '_),
        upload_id: &str,
        predicate: Option<&RecordPredicate>,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, UploadError> {
        let staged = tx.query_staging(upload_id).await?;
        let selected: Vec<StagingRecord> = match predicate {
            Some(keep) => staged.into_iter().filter(|r| keep(r)).collect(),
            None => staged,
        };

        if selected.is_empty() {
            debug!("nothing staged for this upload; promotion is a no-op");
            return Ok(MigrationReport::default());
        }

        let promoted: Vec<MasterRecord> =
            selected.iter().cloned().map(MasterRecord::from).collect();
        tx.insert_master(&promoted).await?;

        self.progress
            .publish(ProgressEvent::Percent(PROGRESS_PROMOTED));

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let staging_deleted = tx.delete_staging(&selected).await?;

        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        Ok(MigrationReport {
            promoted: promoted.len(),
            staging_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullSink;
    use crate::store::MemoryStore;
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

    async fn seeded(rows: i64) -> MemoryStore {
        let store = MemoryStore::new();
        for n in 1..=rows {
            store.insert_staging(&staged("u1", n)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn promotes_and_clears_staging() {
        let store = seeded(3).await;
        let migrator = Migrator::new(&store, &NullSink);
        let report = migrator
            .migrate("u1", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.promoted, 3);
        assert_eq!(report.staging_deleted, 3);
        assert_eq!(store.master_rows().len(), 3);
        assert!(store.staging_rows().is_empty());
    }

    #[tokio::test]
    async fn second_call_is_a_noop() {
        let store = seeded(2).await;
        let migrator = Migrator::new(&store, &NullSink);
        let token = CancellationToken::new();

        migrator.migrate("u1", None, &token).await.unwrap();
        let report = migrator.migrate("u1", None, &token).await.unwrap();

        assert_eq!(report, MigrationReport::default());
        assert_eq!(store.master_rows().len(), 2);
    }

    #[tokio::test]
    async fn predicate_narrows_the_selection() {
        let store = seeded(4).await;
        let migrator = Migrator::new(&store, &NullSink);
        let keep: RecordPredicate = Box::new(|r| r.row_number <= 2);

        let report = migrator
            .migrate("u1", Some(&keep), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.promoted, 2);
        assert_eq!(store.master_rows().len(), 2);
        assert_eq!(store.staging_rows().len(), 2);
    }

    #[tokio::test]
    async fn insert_failure_rolls_everything_back() {
        let store = seeded(2).await;
        store.fail_next_master_insert();
        let migrator = Migrator::new(&store, &NullSink);

        let err = migrator
            .migrate("u1", None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Pipeline(_)));
        assert!(store.master_rows().is_empty());
        assert_eq!(store.staging_rows().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_before_deletion_promotes_nothing() {
        let store = seeded(2).await;
        let migrator = Migrator::new(&store, &NullSink);
        let token = CancellationToken::new();
        token.cancel();

        let err = migrator.migrate("u1", None, &token).await.unwrap_err();

        assert!(matches!(err, UploadError::Cancelled));
        assert!(store.master_rows().is_empty());
        assert_eq!(store.staging_rows().len(), 2);
    }
}
