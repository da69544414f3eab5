//! Upload API routes
//!
//! One router over the upload coordinator: obtain an id, post a file,
//! cancel a running upload, and watch pipeline progress over SSE.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use rowlift_core::progress::BroadcastSink;
use rowlift_core::{UploadCoordinator, UploadError};

use crate::error::ApiError;

/// Uploads larger than this are rejected at the framework boundary.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
    pub progress: Arc<BroadcastSink>,
}

/// Build the upload API router. Mount under a versioned prefix.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/uploads/id", post(generate_upload_id))
        .route("/uploads", post(upload_file))
        .route("/uploads/:upload_id/cancel", post(cancel_upload))
        .route("/progress", get(progress_events))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Hand out a fresh upload id for the client to attach to its upload and
/// any later cancel call.
async fn generate_upload_id() -> impl IntoResponse {
    Json(json!({ "upload_id": Uuid::new_v4().to_string() }))
}

#[tracing::instrument(skip(state, multipart))]
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload_id: Option<String> = None;
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(UploadError::InvalidInput(format!(
            "Failed to read multipart field: {e}"
        )))
    })? {
        match field.name().unwrap_or("") {
            "upload_id" => {
                let value = field.text().await.map_err(|e| {
                    ApiError(UploadError::InvalidInput(format!(
                        "Failed to read upload_id field: {e}"
                    )))
                })?;
                upload_id = Some(value);
            },
            "file" => {
                let name = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError(UploadError::InvalidInput(format!(
                        "Failed to read file bytes: {e}"
                    )))
                })?;
                file = Some((name, data.to_vec()));
            },
            _ => {},
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| {
        ApiError(UploadError::InvalidInput(
            "No file field found in multipart data".to_string(),
        ))
    })?;
    let upload_id = upload_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let outcome = state.coordinator.run(&file_name, &bytes, &upload_id).await?;

    tracing::info!(
        upload_id = %outcome.upload_id,
        rows_staged = outcome.rows_staged,
        errors = outcome.errors.len(),
        "Upload finished via API"
    );

    Ok((StatusCode::OK, Json(outcome)).into_response())
}

#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
async fn cancel_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Response, ApiError> {
    state.coordinator.cancel_upload(&upload_id)?;
    Ok((
        StatusCode::OK,
        Json(json!({ "upload_id": upload_id, "status": "cancelling" })),
    )
        .into_response())
}

/// Relay pipeline progress events to the client as server-sent events.
async fn progress_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.progress.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => match Event::default().json_data(&event) {
                Ok(sse_event) => Some(Ok(sse_event)),
                Err(e) => {
                    tracing::warn!("Failed to serialize progress event: {}", e);
                    None
                },
            },
            // A lagged receiver just resumes with the next event.
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
