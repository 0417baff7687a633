//! Defines the HTTP surface.
//!
//! - `GET  /healthz`, `GET /readyz` -> probes
//! - `GET  /api/videos` -> full catalog listing
//! - `GET  /api/videos/location/{locationId}` -> listing filtered by location
//! - `GET|HEAD /api/videos/stream/{manifestId}` -> payload with Range support

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        stream_handlers::{head_video, stream_video},
        video_handlers::{list_videos, videos_by_location},
    },
    state::AppState,
};
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Route table without state or middleware.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/location/{location_id}", get(videos_by_location))
        .route(
            "/api/videos/stream/{file_id}",
            get(stream_video).head(head_video),
        )
}

/// Full application: routes, permissive CORS for browser players and
/// request tracing.
pub fn build_router(state: AppState) -> Router {
    routes()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
