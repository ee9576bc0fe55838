use axum::extract::State;
use axum::Json;
use pulse_scheduler::JobSnapshot;

use crate::state::AppState;

/// GET /api/jobs: pending jobs in the order they will run.
pub async fn list_jobs(State(app): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(app.scheduler.snapshot())
}
