//! API-side authorization guard.
//!
//! Handlers call [`require`] before touching any service, keeping the
//! engine itself auth-agnostic.

use axum::http::StatusCode;
use axum::response::Response;

use bulkpatch_auth::{Permission, authorize};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Check that the request principal holds `required`; a 403 response otherwise.
pub fn require(principal: &PrincipalContext, required: &Permission) -> Result<(), Response> {
    authorize(principal.principal(), required).map_err(|e| {
        tracing::debug!(
            subject = principal.subject(),
            permission = required.as_str(),
            "permission denied"
        );
        json_error(StatusCode::FORBIDDEN, "forbidden", e.to_string())
    })
}
