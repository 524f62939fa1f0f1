use axum::{
    Router,
    routing::{get, post},
};

pub mod batches;
pub mod drain;
pub mod jobs;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/batches", post(batches::submit_batch))
        .route("/batches/:batch_id", get(batches::get_batch))
        .route("/jobs/status", get(jobs::job_status).post(jobs::bulk_job_status))
        .route("/jobs/results", get(jobs::job_results))
        .route("/drain", post(drain::trigger_drain))
}
