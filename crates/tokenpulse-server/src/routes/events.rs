use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::state::AppState;

/// GET /api/events: SSE stream emitting a `growth` event per alert.
///
/// Lagging subscribers silently miss the alerts that were dropped.
pub async fn sse_alerts(State(app): State<AppState>) -> impl axum::response::IntoResponse {
    let rx = app.alert_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| {
        let alert = msg.ok()?;
        let event = Event::default().event("growth").json_data(&alert).ok()?;
        Some(Ok::<Event, Infallible>(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
