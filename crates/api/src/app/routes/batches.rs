use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use bulkpatch_auth::permissions;
use bulkpatch_core::{BatchId, BatchOptions, Operation};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

/// Accept a batch of field updates. Responds before any downstream call.
pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::SubmitBatchRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::BATCHES_SUBMIT) {
        return resp;
    }
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    let operations: Vec<Operation> = body.operations.into_iter().map(Into::into).collect();
    let options = BatchOptions::from(body.options);

    match services.submitter.submit(operations, options).await {
        Ok(receipt) => {
            tracing::info!(
                subject = principal.subject(),
                batch_id = %receipt.batch_id,
                total_jobs = receipt.total_jobs,
                "submission accepted"
            );
            (
                StatusCode::ACCEPTED,
                Json(dto::SubmitBatchResponse::from(receipt)),
            )
                .into_response()
        }
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub async fn get_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Path(batch_id): Path<String>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::JOBS_READ) {
        return resp;
    }
    let batch_id: BatchId = match batch_id.parse() {
        Ok(id) => id,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("{e}"));
        }
    };

    match services.repo.load_batch(batch_id).await {
        Ok(Some(batch)) => Json(batch).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "batch not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
