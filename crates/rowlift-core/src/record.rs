//! Record shapes flowing through the pipeline
//!
//! A CSV row becomes a [`CandidateRecord`] (ephemeral, decode output), is
//! staged as a [`StagingRecord`] tagged with upload bookkeeping, and is
//! finally promoted to a [`MasterRecord`]. The staging-to-master mapping is
//! a hand-written adapter checked at compile time, not a reflective walk.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Typed projection of one delimited line, plus positional metadata carried
/// alongside it by the decoder. Exists only in transit between decode and
/// validate/stage; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub name: String,
    pub description: String,
    pub kind: String,
    pub internet_id: i64,
    pub created_at: NaiveDateTime,
}

/// A candidate record written to the staging table, tagged with the owning
/// upload id and 1-indexed source row number for later bulk selection.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StagingRecord {
    pub upload_id: String,
    pub row_number: i64,
    pub name: String,
    pub description: String,
    pub kind: String,
    pub internet_id: i64,
    pub created_at: NaiveDateTime,
}

impl StagingRecord {
    pub fn new(record: CandidateRecord, upload_id: &str, row_number: i64) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            row_number,
            name: record.name,
            description: record.description,
            kind: record.kind,
            internet_id: record.internet_id,
            created_at: record.created_at,
        }
    }
}

/// The promoted, business-facing record. Created only by the migrator, in
/// bulk, from staged rows.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct MasterRecord {
    pub name: String,
    pub description: String,
    pub kind: String,
    pub internet_id: i64,
    pub created_at: NaiveDateTime,
}

impl From<StagingRecord> for MasterRecord {
    /// Field-by-field promotion adapter; upload bookkeeping is dropped here.
    fn from(record: StagingRecord) -> Self {
        Self {
            name: record.name,
            description: record.description,
            kind: record.kind,
            internet_id: record.internet_id,
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn candidate() -> CandidateRecord {
        CandidateRecord {
            name: "alpha".to_string(),
            description: "first".to_string(),
            kind: "basic".to_string(),
            internet_id: 42,
            created_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn staging_carries_upload_bookkeeping() {
        let staged = StagingRecord::new(candidate(), "upload-1", 7);
        assert_eq!(staged.upload_id, "upload-1");
        assert_eq!(staged.row_number, 7);
        assert_eq!(staged.name, "alpha");
    }

    #[test]
    fn promotion_drops_upload_bookkeeping() {
        let staged = StagingRecord::new(candidate(), "upload-1", 7);
        let master = MasterRecord::from(staged.clone());
        assert_eq!(master.name, staged.name);
        assert_eq!(master.internet_id, staged.internet_id);
        assert_eq!(master.created_at, staged.created_at);
    }
}
