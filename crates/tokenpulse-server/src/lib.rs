pub mod error;
pub mod routes;
pub mod state;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_alerts))
        // Engine status
        .route("/api/health", get(routes::health::get_health))
        .route("/api/jobs", get(routes::jobs::list_jobs))
        .route("/api/cache", get(routes::cache::get_cache_stats))
        // Tokens
        .route(
            "/api/tokens",
            get(routes::tokens::list_tokens).post(routes::tokens::track_token),
        )
        .route(
            "/api/tokens/{id}",
            get(routes::tokens::get_token).delete(routes::tokens::untrack_token),
        )
        .route("/api/tokens/{id}/market", get(routes::tokens::get_market))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve on a pre-bound listener.
///
/// Lets the caller read the actual port before starting (useful when
/// `port = 0` and the OS picks a free port).
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(app_state);

    tracing::info!("tokenpulse API listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
