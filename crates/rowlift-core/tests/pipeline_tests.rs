//! End-to-end pipeline tests against the in-memory store.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use rowlift_core::decode::CsvDecoder;
use rowlift_core::pipeline::{PipelineOptions, RowErrorPolicy, UploadCoordinator};
use rowlift_core::progress::{BroadcastSink, NullSink, ProgressEvent};
use rowlift_core::session::SessionRegistry;
use rowlift_core::store::{MemoryStore, StoreError, StoreTx, UploadStore};
use rowlift_core::{StagingRecord, UploadError};

const HEADER: &str = "name,description,kind,internet_id,created_at";

fn csv_with_rows(rows: &[&str]) -> Vec<u8> {
    let mut text = String::from(HEADER);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    text.into_bytes()
}

fn valid_rows(count: usize) -> Vec<String> {
    (1..=count)
        .map(|n| format!("item-{n},desc-{n},basic,{n},2024-06-01T12:00:00"))
        .collect()
}

fn utf8_options() -> PipelineOptions {
    PipelineOptions {
        decoder: CsvDecoder::new().with_encoding(encoding_rs::UTF_8),
        row_error_policy: RowErrorPolicy::SkipAndRecord,
    }
}

fn coordinator(store: Arc<dyn UploadStore>) -> UploadCoordinator {
    UploadCoordinator::new(store, Arc::new(SessionRegistry::new()), Arc::new(NullSink))
        .with_options(utf8_options())
}

#[tokio::test]
async fn valid_file_is_staged_in_order_and_promoted() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    let rows = valid_rows(5);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let outcome = coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();

    assert!(outcome.is_success);
    assert_eq!(outcome.rows_staged, 5);
    assert!(outcome.errors.is_empty());

    // Promotion moved everything out of staging.
    assert!(store.staging_rows().is_empty());
    let master = store.master_rows();
    assert_eq!(master.len(), 5);
    assert_eq!(master[0].name, "item-1");
    assert_eq!(master[4].internet_id, 5);

    // Session deregistered on completion.
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn staged_rows_carry_upload_id_and_row_numbers() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    let rows = valid_rows(3);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    coordinator
        .begin_upload("data.csv", &csv_with_rows(&refs), "upload-7")
        .await
        .unwrap();

    let staged = store.staging_rows();
    assert_eq!(staged.len(), 3);
    for (index, record) in staged.iter().enumerate() {
        assert_eq!(record.upload_id, "upload-7");
        assert_eq!(record.row_number, index as i64 + 1);
    }
    // begin_upload does not promote.
    assert!(store.master_rows().is_empty());
}

#[tokio::test]
async fn single_invalid_row_blocks_promotion() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    // Row 2 violates the internet_id range rule.
    let bytes = csv_with_rows(&[
        "item-1,desc,basic,1,2024-06-01T12:00:00",
        "item-2,desc,basic,0,2024-06-01T12:00:00",
        "item-3,desc,basic,3,2024-06-01T12:00:00",
    ]);
    let outcome = coordinator.run("data.csv", &bytes, "upload-1").await.unwrap();

    assert!(!outcome.is_success);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].row_number, 2);
    assert_eq!(outcome.errors[0].field_name, "Internet ID");

    // Nothing promoted; valid rows stay staged for diagnosis.
    assert!(store.master_rows().is_empty());
    assert_eq!(store.staging_rows().len(), 2);
}

#[tokio::test]
async fn conversion_error_is_skipped_and_recorded() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    let bytes = csv_with_rows(&[
        "item-1,desc,basic,not-a-number,2024-06-01T12:00:00",
        "item-2,desc,basic,2,2024-06-01T12:00:00",
    ]);
    let outcome = coordinator.run("data.csv", &bytes, "upload-1").await.unwrap();

    assert!(!outcome.is_success);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].row_number, 1);
    assert_eq!(outcome.errors[0].field_name, "internet_id");
    assert!(outcome.errors[0].message.starts_with("bad-format:"));

    // The decoder resumed on the next row.
    assert_eq!(store.staging_rows().len(), 1);
    assert_eq!(store.staging_rows()[0].row_number, 2);
}

#[tokio::test]
async fn abort_file_policy_makes_first_conversion_error_fatal() {
    let store = Arc::new(MemoryStore::new());
    let options = PipelineOptions {
        decoder: CsvDecoder::new().with_encoding(encoding_rs::UTF_8),
        row_error_policy: RowErrorPolicy::AbortFile,
    };
    let coordinator = UploadCoordinator::new(
        store.clone(),
        Arc::new(SessionRegistry::new()),
        Arc::new(NullSink),
    )
    .with_options(options);

    let bytes = csv_with_rows(&[
        "item-1,desc,basic,not-a-number,2024-06-01T12:00:00",
        "item-2,desc,basic,2,2024-06-01T12:00:00",
    ]);
    let err = coordinator
        .run("data.csv", &bytes, "upload-1")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Pipeline(_)));
    assert!(store.staging_rows().is_empty());
    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn error_list_is_capped_at_one_hundred() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    // 150 rows, every one violating the range rule.
    let rows: Vec<String> = (1..=150)
        .map(|n| format!("item-{n},desc,basic,0,2024-06-01T12:00:00"))
        .collect();
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let outcome = coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();

    assert!(!outcome.is_success);
    assert_eq!(outcome.errors.len(), 100);
}

#[tokio::test]
async fn reaching_the_cap_stops_consuming_input() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    // First 100 rows invalid, the rest valid: if processing continued past
    // the cap these valid rows would land in staging.
    let mut rows: Vec<String> = (1..=100)
        .map(|n| format!("item-{n},desc,basic,0,2024-06-01T12:00:00"))
        .collect();
    rows.extend((101..=150).map(|n| format!("item-{n},desc,basic,{n},2024-06-01T12:00:00")));
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();

    let outcome = coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();

    assert_eq!(outcome.errors.len(), 100);
    assert_eq!(outcome.rows_staged, 0);
    assert!(store.staging_rows().is_empty());
}

#[tokio::test]
async fn cancel_unknown_upload_fails_without_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    let err = coordinator.cancel_upload("does-not-exist").unwrap_err();
    assert!(matches!(err, UploadError::UnknownUpload(_)));
    assert!(store.staging_rows().is_empty());
}

/// Store wrapper that trips the session's cancellation signal after a fixed
/// number of staging inserts, simulating a cancel arriving mid-file.
struct CancelAfter {
    inner: Arc<MemoryStore>,
    registry: Arc<SessionRegistry>,
    upload_id: String,
    after: usize,
    inserted: AtomicUsize,
}

#[async_trait]
impl UploadStore for CancelAfter {
    async fn insert_staging(&self, record: &StagingRecord) -> Result<(), StoreError> {
        self.inner.insert_staging(record).await?;
        if self.inserted.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            let _ = self.registry.cancel(&self.upload_id);
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        self.inner.begin().await
    }
}

#[tokio::test]
async fn cancellation_before_row_k_stages_nothing_past_it() {
    let inner = Arc::new(MemoryStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let store = Arc::new(CancelAfter {
        inner: inner.clone(),
        registry: registry.clone(),
        upload_id: "upload-1".to_string(),
        after: 3,
        inserted: AtomicUsize::new(0),
    });
    let coordinator = UploadCoordinator::new(store, registry.clone(), Arc::new(NullSink))
        .with_options(utf8_options());

    let rows = valid_rows(10);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let err = coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    // Rows 1..=3 were staged before the signal tripped; nothing after.
    assert_eq!(inner.staging_rows().len(), 3);
    assert!(inner.master_rows().is_empty());
    // Terminal state deregistered the session.
    assert!(registry.is_empty());
}

fn zip_with_entries(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn archive_fans_out_to_every_csv_entry() {
    let store = Arc::new(MemoryStore::new());
    let progress = Arc::new(BroadcastSink::new(1024));
    let mut events = progress.subscribe();
    let coordinator = UploadCoordinator::new(
        store.clone(),
        Arc::new(SessionRegistry::new()),
        progress.clone(),
    )
    .with_options(utf8_options());

    let first = valid_rows(5);
    let first_refs: Vec<&str> = first.iter().map(String::as_str).collect();
    let second = valid_rows(7);
    let second_refs: Vec<&str> = second.iter().map(String::as_str).collect();
    let archive = zip_with_entries(&[
        ("a.csv", csv_with_rows(&first_refs).as_slice()),
        ("readme.txt", b"not a csv".as_slice()),
        ("B.CSV", csv_with_rows(&second_refs).as_slice()),
    ]);

    let outcome = coordinator
        .run("bundle.zip", &archive, "upload-1")
        .await
        .unwrap();

    assert!(outcome.is_success);
    assert_eq!(outcome.rows_staged, 12);
    assert_eq!(store.master_rows().len(), 12);
    assert!(store.staging_rows().is_empty());

    // Per-entry milestones arrive sequentially, in archive order.
    let mut milestones = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::Message(message) = event {
            milestones.push(message);
        }
    }
    assert_eq!(milestones, vec!["finished a.csv", "finished B.CSV"]);
}

#[tokio::test]
async fn progress_includes_dispatch_and_completion_milestones() {
    let store = Arc::new(MemoryStore::new());
    let progress = Arc::new(BroadcastSink::new(1024));
    let mut events = progress.subscribe();
    let coordinator = UploadCoordinator::new(
        store,
        Arc::new(SessionRegistry::new()),
        progress.clone(),
    )
    .with_options(utf8_options());

    let rows = valid_rows(4);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();

    let mut percents = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::Percent(p) = event {
            percents.push(p);
        }
    }
    assert!(percents.contains(&30));
    assert!(percents.contains(&70));
    assert_eq!(percents.last(), Some(&100));
}

#[tokio::test]
async fn migrate_after_run_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());

    let rows = valid_rows(2);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();

    let report = coordinator.migrate("upload-1", None).await.unwrap();
    assert_eq!(report.promoted, 0);
    assert_eq!(store.master_rows().len(), 2);
}

#[tokio::test]
async fn empty_and_unsupported_inputs_are_invalid() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store);

    let err = coordinator.run("data.csv", b"", "u1").await.unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));

    let err = coordinator
        .run("data.parquet", b"bytes", "u1")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidInput(_)));

    assert!(coordinator.registry().is_empty());
}

#[tokio::test]
async fn reused_upload_id_starts_a_fresh_session() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(store.clone());
    let rows = valid_rows(1);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let bytes = csv_with_rows(&refs);

    coordinator.run("data.csv", &bytes, "upload-1").await.unwrap();
    // Second upload with the same id is independent of the first session.
    let outcome = coordinator.run("data.csv", &bytes, "upload-1").await.unwrap();

    assert!(outcome.is_success);
    assert_eq!(store.master_rows().len(), 2);
}

#[tokio::test]
async fn stale_cancel_does_not_poison_new_session() {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let coordinator = UploadCoordinator::new(store.clone(), registry.clone(), Arc::new(NullSink))
        .with_options(utf8_options());

    // A cancel left over from an earlier session must not poison a new one.
    let token: CancellationToken = registry.register("upload-1");
    token.cancel();
    assert!(registry.cancel("upload-1").is_ok());

    // Registering again hands out a fresh signal, so the upload proceeds.
    let rows = valid_rows(1);
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    let outcome = coordinator
        .run("data.csv", &csv_with_rows(&refs), "upload-1")
        .await
        .unwrap();
    assert!(outcome.is_success);
    assert_eq!(store.master_rows().len(), 1);
}
