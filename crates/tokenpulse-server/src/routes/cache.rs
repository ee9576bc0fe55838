use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/cache: shared fetch cache statistics.
pub async fn get_cache_stats(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cache = app.monitor.fetcher().cache();
    let stats = cache.stats();
    Json(serde_json::json!({
        "hits": stats.hits,
        "misses": stats.misses,
        "entries": stats.entries,
        "hit_rate": stats.hit_rate(),
        "ttl_secs": cache.ttl().as_secs(),
    }))
}
