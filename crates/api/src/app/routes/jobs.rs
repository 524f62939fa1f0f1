use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use bulkpatch_auth::permissions;
use bulkpatch_infra::jobs::{AggregatorError, QueryKind, ResultFilter, StatusFormat, parse_job_ids};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz;
use crate::context::PrincipalContext;

fn parse_format(raw: Option<&str>) -> Result<StatusFormat, AggregatorError> {
    raw.unwrap_or_default().parse()
}

pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::StatusQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::JOBS_READ) {
        return resp;
    }

    let outcome = async {
        let ids = parse_job_ids(dto::split_ids(&query.ids), QueryKind::Read)?;
        let format = parse_format(query.format.as_deref())?;
        services.aggregator.status(&ids, format).await
    }
    .await;

    match outcome {
        Ok(body) => Json(body).into_response(),
        Err(e) => errors::aggregator_error_to_response(e),
    }
}

pub async fn bulk_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::BulkStatusRequest>, JsonRejection>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::JOBS_READ) {
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

    let outcome = async {
        let ids = parse_job_ids(&body.job_ids, QueryKind::Bulk)?;
        let format = parse_format(body.format.as_deref())?;
        services.aggregator.status(&ids, format).await
    }
    .await;

    match outcome {
        Ok(body) => Json(body).into_response(),
        Err(e) => errors::aggregator_error_to_response(e),
    }
}

pub async fn job_results(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    Query(query): Query<dto::ResultsQuery>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::JOBS_READ) {
        return resp;
    }

    let outcome = async {
        let ids = parse_job_ids(dto::split_ids(&query.ids), QueryKind::Read)?;
        let format = parse_format(query.format.as_deref())?;
        let filter = ResultFilter::from_flags(query.only_successful, query.only_errors)?;
        services.aggregator.results(&ids, format, filter).await
    }
    .await;

    match outcome {
        Ok(body) => Json(body).into_response(),
        Err(e) => errors::aggregator_error_to_response(e),
    }
}
