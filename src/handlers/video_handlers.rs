//! Catalog listing endpoints.
//!
//! - GET /api/videos                        -> every video
//! - GET /api/videos/location/{locationId}  -> videos shot at one location

use crate::{
    errors::AppError,
    models::video::{VideoRecord, VideoResponse},
    services::catalog_service::CatalogField,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

const LIST_CACHE_CONTROL: &str = "public, max-age=300";

/// `GET /api/videos`
pub async fn list_videos(State(state): State<AppState>) -> Result<Response, AppError> {
    let records = state.catalog.find_all().await?;
    tracing::debug!(count = records.len(), "listed videos");
    Ok(listing(records, &state.config.public_base_url))
}

/// `GET /api/videos/location/{locationId}`
///
/// An unknown location is not an error; it lists nothing.
pub async fn videos_by_location(
    State(state): State<AppState>,
    Path(location_id): Path<String>,
) -> Result<Response, AppError> {
    let records = state
        .catalog
        .find_by_field(CatalogField::LocationId, &location_id)
        .await?;
    tracing::debug!(%location_id, count = records.len(), "listed videos by location");
    Ok(listing(records, &state.config.public_base_url))
}

fn listing(records: Vec<VideoRecord>, base_url: &str) -> Response {
    let videos: Vec<VideoResponse> = records
        .into_iter()
        .map(|record| VideoResponse::from_record(record, base_url))
        .collect();

    let mut response = Json(videos).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(LIST_CACHE_CONTROL),
    );
    response
}
