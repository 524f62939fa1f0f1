use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bulkpatch_infra::jobs::{AggregatorError, DrainError, SubmitError};
use bulkpatch_infra::store::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Unavailable(msg) => {
            tracing::warn!(error = %msg, "store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
        e @ (StoreError::ValueTooLarge { .. } | StoreError::KeyTooLong { .. }) => {
            json_error(StatusCode::PAYLOAD_TOO_LARGE, "record_too_large", e.to_string())
        }
        e @ StoreError::Corrupt { .. } => {
            tracing::error!(error = %e, "corrupt record");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        SubmitError::Store(e) => store_error_to_response(e),
    }
}

pub fn aggregator_error_to_response(err: AggregatorError) -> axum::response::Response {
    match err {
        AggregatorError::Store(e) => store_error_to_response(e),
        AggregatorError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", err.to_string()),
        AggregatorError::NothingCompleted => (
            StatusCode::ACCEPTED,
            axum::Json(json!({
                "status": "pending",
                "message": err.to_string(),
            })),
        )
            .into_response(),
        AggregatorError::TooManyIds { .. } => {
            json_error(StatusCode::BAD_REQUEST, "too_many_ids", err.to_string())
        }
        e => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    }
}

pub fn drain_error_to_response(err: DrainError) -> axum::response::Response {
    match err {
        DrainError::AlreadyRunning => {
            json_error(StatusCode::CONFLICT, "drain_in_progress", err.to_string())
        }
        DrainError::Store(e) => store_error_to_response(e),
    }
}
