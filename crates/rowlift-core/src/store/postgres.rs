//! PostgreSQL store backed by sqlx
//!
//! Staging rows live in `staging_records`, promoted rows in
//! `master_records` (see the workspace `migrations/` directory). Bulk
//! inserts go through `QueryBuilder::push_values`; bulk deletes match on
//! `upload_id` plus `row_number = ANY(..)`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use super::{StoreError, StoreTx, UploadStore};
use crate::record::{MasterRecord, StagingRecord};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UploadStore for PgStore {
    async fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO staging_records
                (upload_id, row_number, name, description, kind, internet_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.upload_id)
        .bind(record.row_number)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.kind)
        .bind(record.internet_id)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn query_staging(&mut self, upload_id: &str) -> Result<Vec<StagingRecord>, StoreError> {
        let records = sqlx::query_as::<_, StagingRecord>(
            r#"
            SELECT upload_id, row_number, name, description, kind, internet_id, created_at
            FROM staging_records
            WHERE upload_id = $1
            ORDER BY row_number
            "#,
        )
        .bind(upload_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(records)
    }

    async fn insert_master(&mut self, records: &[MasterRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO master_records (name, description, kind, internet_id, created_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(&record.name)
                .push_bind(&record.description)
                .push_bind(&record.kind)
                .push_bind(record.internet_id)
                .push_bind(record.created_at);
        });
        builder.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_staging(&mut self, records: &[StagingRecord]) -> Result<u64, StoreError> {
        // Group by upload id so the ANY(..) match stays exact even if a
        // caller-supplied predicate ever selects across sessions.
        let mut by_upload: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for record in records {
            by_upload
                .entry(record.upload_id.as_str())
                .or_default()
                .push(record.row_number);
        }

        let mut deleted = 0u64;
        for (upload_id, row_numbers) in by_upload {
            let result = sqlx::query(
                r#"
                DELETE FROM staging_records
                WHERE upload_id = $1 AND row_number = ANY($2)
                "#,
            )
            .bind(upload_id)
            .bind(&row_numbers)
            .execute(&mut *self.tx)
            .await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
