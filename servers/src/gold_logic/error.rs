use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_common::connections::PersistenceError;
use serde_json::json;

/// Failures surfaced by the HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The history store could not answer.
    Persistence(PersistenceError),
    /// A `limit` query parameter of zero.
    InvalidLimit,
}

impl From<PersistenceError> for AppError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::InvalidLimit => AppError::InvalidLimit,
            other => AppError::Persistence(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_json) = match self {
            AppError::Persistence(e) => {
                log::error!("History query failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error_type": "HistoryStoreError",
                        "message": "Failed to read price history. The database might be unavailable.",
                        "detail": e.to_string()
                    }),
                )
            }
            AppError::InvalidLimit => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error_type": "InvalidRequest",
                    "message": "Query parameter 'limit' must be a positive integer.",
                    "detail": "limit=0"
                }),
            ),
        };
        (status, Json(error_json)).into_response()
    }
}
