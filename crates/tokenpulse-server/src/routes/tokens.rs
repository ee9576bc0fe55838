use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tokenpulse_core::store::TokenStore;
use tokenpulse_core::alert::format_market_cap;
use tokenpulse_core::types::{validate_identifier, TokenState};
use tokenpulse_core::PulseError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TrackBody {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
}

fn token_json(app: &AppState, t: &TokenState) -> serde_json::Value {
    serde_json::json!({
        "id": t.id,
        "symbol": t.symbol,
        "active": t.active,
        "category": app.monitor.strategy().category_of(&t.id),
        "first_seen": t.first_seen,
        "initial_market_cap": t.initial_market_cap,
        "peak_market_cap": t.peak_market_cap,
        "current_market_cap": t.current_market_cap,
        "price_usd": t.price_usd,
        "multiplier": t.multiplier(),
        "alert_watermark": t.alert_watermark,
        "updated_at": t.updated_at,
    })
}

/// GET /api/tokens: every actively tracked token.
pub async fn list_tokens(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let tokens = app.monitor.store().list_active().await?;
    let list: Vec<serde_json::Value> = tokens.iter().map(|t| token_json(&app, t)).collect();
    Ok(Json(serde_json::json!(list)))
}

/// POST /api/tokens: start (or resume) tracking a token.
pub async fn track_token(
    State(app): State<AppState>,
    Json(body): Json<TrackBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let id = body.id.trim();
    if id.is_empty() {
        return Err(AppError::bad_request("id is required"));
    }
    let state = tokenpulse_core::store::track_token(
        app.monitor.store().as_ref(),
        id,
        body.symbol,
        chrono::Utc::now(),
    )
    .await?;
    tracing::info!(token = %state.id, "tracking token");
    Ok((StatusCode::CREATED, Json(token_json(&app, &state))))
}

/// GET /api/tokens/{id}: one token, 404 if never tracked.
pub async fn get_token(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app
        .monitor
        .store()
        .get(&id)
        .await?
        .ok_or(PulseError::TokenNotFound(id))?;
    Ok(Json(token_json(&app, &state)))
}

/// DELETE /api/tokens/{id}: stop tracking, keeping the stored history.
pub async fn untrack_token(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.monitor.store().deactivate(&id).await?;
    app.monitor.strategy().forget(&id);
    tracing::info!(token = %id, "stopped tracking token");
    Ok(Json(token_json(&app, &state)))
}

/// GET /api/tokens/{id}/market: latest market data for any identifier,
/// tracked or not. `market` is null when upstream lists no pair.
pub async fn get_market(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_identifier(&id)?;
    let record = app.monitor.fetcher().fetch_one(&id).await;
    let label = format_market_cap(record.as_ref().and_then(|r| r.market_cap));
    Ok(Json(serde_json::json!({
        "id": id,
        "market": record,
        "market_cap_label": label,
    })))
}
