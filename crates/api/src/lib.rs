pub mod error;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod ws;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.settings.http.max_body_bytes;

    // Batch surface: upload, polling, SSE, error log.
    let conversation_routes = Router::new()
        .route(
            "/request",
            post(routes::conversation::create_conversation_request),
        )
        .route(
            "/result/{job_id}",
            get(routes::conversation::get_conversation_result),
        )
        .route(
            "/stream-events/{job_id}",
            get(routes::conversation::stream_events),
        )
        .route("/errors/{job_id}", get(routes::conversation::get_job_errors))
        .layer(DefaultBodyLimit::max(body_limit));

    // Live surface: session creation, room info, health.
    let stream_routes = Router::new()
        .route("/create", post(routes::stream::create_stream_job))
        .route("/room/{room_id}", get(routes::stream::get_room_info))
        .route("/health", get(routes::stream::health));

    Router::new()
        .nest("/api/v1/conversation", conversation_routes)
        .nest("/api/v1/stream", stream_routes)
        .route("/ws/v1/stream/{job_id}", get(ws::handler::ws_upgrade))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
