//! src/services/catalog_service.rs
//!
//! Catalog: descriptive video records in SQLite, decoupled from payload
//! bytes. Each record references exactly one committed manifest; deleting a
//! record leaves the manifest alone (see `IngestPipeline::remove_video` for
//! full removal).

use crate::models::video::{VideoRecord, VideoRow};
use crate::services::{is_unavailable, is_unique_violation};
use serde::Deserialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use tracing::debug;

const VIDEO_COLUMNS: &str = "video_id, filename, manifest_ref, location_id, location_name, \
     country, lat, lng, creator, thumbnail_url, duration, views, likes, virality_score, \
     token, betting_pool, paid_to_post, categories, stream_tags, xp_earned, created_at, updated_at";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("video `{0}` not found")]
    NotFound(String),
    #[error("video `{0}` already exists")]
    DuplicateId(String),
    #[error("invalid video record: {0}")]
    InvalidRecord(String),
    #[error("unknown catalog field `{0}`")]
    UnknownField(String),
    #[error("backing storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),
    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        if is_unavailable(&err) {
            CatalogError::StorageUnavailable(err)
        } else {
            CatalogError::Sqlx(err)
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Fields a catalog query may filter on by equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CatalogField {
    LocationId,
    Country,
    CreatorId,
}

impl CatalogField {
    fn column(self) -> &'static str {
        match self {
            CatalogField::LocationId => "location_id",
            CatalogField::Country => "country",
            CatalogField::CreatorId => "creator_id",
        }
    }
}

impl FromStr for CatalogField {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locationId" | "location_id" => Ok(CatalogField::LocationId),
            "country" => Ok(CatalogField::Country),
            "creatorId" | "creator_id" => Ok(CatalogField::CreatorId),
            other => Err(CatalogError::UnknownField(other.to_string())),
        }
    }
}

/// Catalog offers insert, scan, equality filter and delete over video
/// records. Cloning shares the pool.
#[derive(Clone)]
pub struct Catalog {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl Catalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Validate and insert a new record.
    ///
    /// Fails with `DuplicateId` when `video_id` exists, and with
    /// `InvalidRecord` when the shape is wrong or `manifest_ref` does not
    /// name a committed manifest that is still free.
    pub async fn insert(&self, record: &VideoRecord) -> CatalogResult<()> {
        record.validate().map_err(CatalogError::InvalidRecord)?;

        let committed: Option<bool> =
            sqlx::query_scalar("SELECT committed FROM manifests WHERE id = ?")
                .bind(record.manifest_ref)
                .fetch_optional(&*self.db)
                .await?;
        if committed != Some(true) {
            return Err(CatalogError::InvalidRecord(format!(
                "manifestRef `{}` does not resolve to a committed upload",
                record.manifest_ref
            )));
        }

        let result = sqlx::query(&format!(
            "INSERT INTO videos ({VIDEO_COLUMNS}, creator_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&record.video_id)
        .bind(&record.filename)
        .bind(record.manifest_ref)
        .bind(&record.location_id)
        .bind(&record.location_name)
        .bind(&record.country)
        .bind(record.coordinates.lat)
        .bind(record.coordinates.lng)
        .bind(Json(&record.creator))
        .bind(&record.thumbnail_url)
        .bind(record.duration)
        .bind(record.views)
        .bind(record.likes)
        .bind(record.virality_score)
        .bind(record.token.as_ref().map(Json))
        .bind(record.betting_pool)
        .bind(record.paid_to_post)
        .bind(Json(&record.categories))
        .bind(Json(&record.stream_tags))
        .bind(record.xp_earned)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.creator.id)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                debug!(video_id = %record.video_id, manifest = %record.manifest_ref, "inserted video");
                Ok(())
            }
            Err(sqlx::Error::Database(db_err))
                if db_err.message().contains("manifest_ref") =>
            {
                Err(CatalogError::InvalidRecord(format!(
                    "manifestRef `{}` is already used by another video",
                    record.manifest_ref
                )))
            }
            Err(err) if is_unique_violation(&err) => {
                Err(CatalogError::DuplicateId(record.video_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Every record, ordered by creation time then id.
    pub async fn find_all(&self) -> CatalogResult<Vec<VideoRecord>> {
        let rows: Vec<VideoRow> = sqlx::query_as(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos ORDER BY created_at ASC, video_id ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(VideoRecord::from).collect())
    }

    /// Records whose `field` equals `value`, in the same order as `find_all`.
    pub async fn find_by_field(
        &self,
        field: CatalogField,
        value: &str,
    ) -> CatalogResult<Vec<VideoRecord>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE "));
        builder.push(field.column());
        builder.push(" = ");
        builder.push_bind(value);
        builder.push(" ORDER BY created_at ASC, video_id ASC");

        let rows: Vec<VideoRow> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows.into_iter().map(VideoRecord::from).collect())
    }

    /// A single record by its video id.
    pub async fn find_by_id(&self, video_id: &str) -> CatalogResult<VideoRecord> {
        let row: Option<VideoRow> = sqlx::query_as(&format!(
            "SELECT {VIDEO_COLUMNS} FROM videos WHERE video_id = ?"
        ))
        .bind(video_id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(VideoRecord::from)
            .ok_or_else(|| CatalogError::NotFound(video_id.to_string()))
    }

    /// Remove a record. The referenced manifest is left in place.
    pub async fn delete_by_id(&self, video_id: &str) -> CatalogResult<VideoRecord> {
        let record = self.find_by_id(video_id).await?;
        let result = sqlx::query("DELETE FROM videos WHERE video_id = ?")
            .bind(video_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(video_id.to_string()));
        }
        debug!(video_id, "deleted video record");
        Ok(record)
    }

    pub async fn count(&self) -> CatalogResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM videos")
            .fetch_one(&*self.db)
            .await?;
        Ok(count)
    }
}
