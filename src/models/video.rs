//! Represents a catalog entry describing one video.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// Geographic position of the place a video was shot.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// The account that posted a video.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub xp_points: i64,
    #[serde(default)]
    pub total_earnings: f64,
}

/// Market figures for the location token shown next to a video.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetrics {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "change24h")]
    pub change_24h: f64,
    pub volume: f64,
    pub holders: i64,
    pub market_cap: f64,
}

/// A descriptive, queryable record about one video.
///
/// Everything except the engagement counters is fixed at creation. The
/// record never holds bytes; `manifest_ref` points at the chunk-store
/// manifest that does.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// Externally visible identifier.
    pub video_id: String,

    /// Name of the source file the payload was ingested from.
    pub filename: String,

    /// The manifest holding this video's payload. One manifest per record.
    pub manifest_ref: Uuid,

    pub location_id: String,
    pub location_name: String,
    pub country: String,
    pub coordinates: Coordinates,

    pub creator: Creator,
    pub thumbnail_url: String,

    /// Measured playback length in seconds.
    pub duration: f64,

    pub views: i64,
    pub likes: i64,
    pub virality_score: i64,
    pub token: Option<TokenMetrics>,
    pub betting_pool: f64,
    pub paid_to_post: f64,
    pub categories: Vec<String>,
    pub stream_tags: Vec<String>,
    pub xp_earned: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Check the record's shape before it is written.
    ///
    /// Returns a human-readable reason on the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.video_id.trim().is_empty() {
            return Err("videoId must not be empty".into());
        }
        if self.location_id.trim().is_empty() {
            return Err("locationId must not be empty".into());
        }
        if self.creator.id.trim().is_empty() {
            return Err("creator.id must not be empty".into());
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(format!("duration {} is not a valid length", self.duration));
        }
        if self.views < 0 || self.likes < 0 {
            return Err("engagement counters must not be negative".into());
        }
        let Coordinates { lat, lng } = self.coordinates;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(format!("coordinates ({lat}, {lng}) are out of range"));
        }
        Ok(())
    }
}

/// Row shape of the `videos` table.
///
/// Nested objects and lists are stored as JSON text columns.
#[derive(FromRow, Debug)]
pub struct VideoRow {
    pub video_id: String,
    pub filename: String,
    pub manifest_ref: Uuid,
    pub location_id: String,
    pub location_name: String,
    pub country: String,
    pub lat: f64,
    pub lng: f64,
    pub creator: Json<Creator>,
    pub thumbnail_url: String,
    pub duration: f64,
    pub views: i64,
    pub likes: i64,
    pub virality_score: i64,
    pub token: Option<Json<TokenMetrics>>,
    pub betting_pool: f64,
    pub paid_to_post: f64,
    pub categories: Json<Vec<String>>,
    pub stream_tags: Json<Vec<String>>,
    pub xp_earned: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<VideoRow> for VideoRecord {
    fn from(row: VideoRow) -> Self {
        Self {
            video_id: row.video_id,
            filename: row.filename,
            manifest_ref: row.manifest_ref,
            location_id: row.location_id,
            location_name: row.location_name,
            country: row.country,
            coordinates: Coordinates {
                lat: row.lat,
                lng: row.lng,
            },
            creator: row.creator.0,
            thumbnail_url: row.thumbnail_url,
            duration: row.duration,
            views: row.views,
            likes: row.likes,
            virality_score: row.virality_score,
            token: row.token.map(|t| t.0),
            betting_pool: row.betting_pool,
            paid_to_post: row.paid_to_post,
            categories: row.categories.0,
            stream_tags: row.stream_tags.0,
            xp_earned: row.xp_earned,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Location block of the public video JSON.
#[derive(Serialize, Debug)]
pub struct LocationView {
    pub id: String,
    pub name: String,
    pub country: String,
    pub coordinates: Coordinates,
}

/// Public JSON shape served by the listing endpoints.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    pub id: String,
    pub video_url: String,
    pub location: LocationView,
    pub creator: Creator,
    pub thumbnail_url: String,
    pub duration: f64,
    pub views: i64,
    pub likes: i64,
    pub virality_score: i64,
    pub token: Option<TokenMetrics>,
    pub betting_pool: f64,
    pub paid_to_post: f64,
    pub categories: Vec<String>,
    pub stream_tags: Vec<String>,
    pub xp_earned: i64,
    pub created_at: DateTime<Utc>,
}

impl VideoResponse {
    /// Build the public view, pointing `videoUrl` at the stream endpoint
    /// under `base_url`.
    pub fn from_record(record: VideoRecord, base_url: &str) -> Self {
        Self {
            video_url: format!(
                "{}/api/videos/stream/{}",
                base_url.trim_end_matches('/'),
                record.manifest_ref
            ),
            id: record.video_id,
            location: LocationView {
                id: record.location_id,
                name: record.location_name,
                country: record.country,
                coordinates: record.coordinates,
            },
            creator: record.creator,
            thumbnail_url: record.thumbnail_url,
            duration: record.duration,
            views: record.views,
            likes: record.likes,
            virality_score: record.virality_score,
            token: record.token,
            betting_pool: record.betting_pool,
            paid_to_post: record.paid_to_post,
            categories: record.categories,
            stream_tags: record.stream_tags,
            xp_earned: record.xp_earned,
            created_at: record.created_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record(video_id: &str, location_id: &str, manifest_ref: Uuid) -> VideoRecord {
        let now = Utc::now();
        VideoRecord {
            video_id: video_id.to_string(),
            filename: format!("{video_id}.mp4"),
            manifest_ref,
            location_id: location_id.to_string(),
            location_name: location_id.to_uppercase(),
            country: "Testland".into(),
            coordinates: Coordinates { lat: 1.5, lng: 2.5 },
            creator: Creator {
                id: "creator1".into(),
                username: "@tester".into(),
                avatar: String::new(),
                xp_points: 10,
                total_earnings: 1.25,
            },
            thumbnail_url: "/placeholder.svg".into(),
            duration: 3.0,
            views: 0,
            likes: 0,
            virality_score: 70,
            token: None,
            betting_pool: 0.0,
            paid_to_post: 0.1,
            categories: vec!["food".into()],
            stream_tags: vec![location_id.to_string()],
            xp_earned: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;

    #[test]
    fn valid_record_passes() {
        assert!(record("v1", "bali", Uuid::new_v4()).validate().is_ok());
    }

    #[test]
    fn rejects_blank_ids_and_bad_duration() {
        let mut r = record(" ", "bali", Uuid::new_v4());
        assert!(r.validate().is_err());

        r = record("v1", "", Uuid::new_v4());
        assert!(r.validate().is_err());

        r = record("v1", "bali", Uuid::new_v4());
        r.duration = f64::NAN;
        assert!(r.validate().is_err());
        r.duration = -1.0;
        assert!(r.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let mut r = record("v1", "bali", Uuid::new_v4());
        r.coordinates = Coordinates {
            lat: 91.0,
            lng: 0.0,
        };
        assert!(r.validate().is_err());
    }

    #[test]
    fn response_points_at_stream_endpoint() {
        let id = Uuid::new_v4();
        let resp = VideoResponse::from_record(record("v1", "bali", id), "http://localhost:3001/");
        assert_eq!(
            resp.video_url,
            format!("http://localhost:3001/api/videos/stream/{id}")
        );
        assert_eq!(resp.location.id, "bali");

        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("videoUrl").is_some());
        assert!(json.get("streamTags").is_some());
    }
}
