use std::sync::Arc;

use axum::{Json, extract::Extension, response::IntoResponse};

use bulkpatch_auth::permissions;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::PrincipalContext;

/// Manual drain trigger; responds with the same summary a scheduled run logs.
pub async fn trigger_drain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = authz::require(&principal, &permissions::DRAIN_TRIGGER) {
        return resp;
    }

    tracing::info!(subject = principal.subject(), "manual drain triggered");
    match services.run_drain().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::drain_error_to_response(e),
    }
}
