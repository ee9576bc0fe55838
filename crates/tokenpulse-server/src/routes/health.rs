use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/health: scheduler liveness and queue depth.
pub async fn get_health(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "scheduler_running": app.scheduler.is_running(),
        "pending_jobs": app.scheduler.pending_count(),
        "running_jobs": app.scheduler.running_count(),
        "tracked_tokens": app.monitor.strategy().len(),
    }))
}
