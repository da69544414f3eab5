//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rowlift_core::UploadError;
use serde_json::json;

/// Non-standard status reported when the client cancelled its own upload,
/// mirroring the nginx convention for client-closed requests.
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// HTTP-facing wrapper over pipeline errors.
#[derive(Debug)]
pub struct ApiError(pub UploadError);

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.0 {
            UploadError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message),
            UploadError::UnknownUpload(id) => {
                (StatusCode::NOT_FOUND, format!("unknown upload id: {id}"))
            },
            UploadError::Cancelled => (
                StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "upload was cancelled".to_string(),
            ),
            UploadError::Pipeline(ref e) => {
                tracing::error!("Pipeline error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}
