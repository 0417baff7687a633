//! src/services/ingest_service.rs
//!
//! IngestPipeline: batch front-end that turns source files into a committed
//! manifest plus a catalog record. From the caller's side each file either
//! lands completely or leaves nothing behind: a failed catalog insert deletes
//! the manifest it would have referenced.

use crate::models::{
    manifest::Manifest,
    video::{Coordinates, Creator, TokenMetrics, VideoRecord},
};
use crate::services::{
    catalog_service::{Catalog, CatalogError},
    chunk_store::{ChunkStore, StoreError},
    probe::DurationProbe,
};
use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Where a video was shot, as given in a batch file.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationInput {
    pub id: String,
    pub name: String,
    pub country: String,
    pub coordinates: Coordinates,
}

/// One source file plus the descriptive metadata to catalog it under.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub video_id: Option<String>,
    pub location: LocationInput,
    pub creator: Creator,
    #[serde(default)]
    pub categories: Vec<String>,
    /// Defaults to `[location name, country]` when empty.
    #[serde(default)]
    pub stream_tags: Vec<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub token: Option<TokenMetrics>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub virality_score: i64,
    #[serde(default)]
    pub betting_pool: f64,
    #[serde(default)]
    pub paid_to_post: f64,
    #[serde(default)]
    pub xp_earned: i64,
    /// Skips probing when set.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl IngestEntry {
    fn video_id(&self) -> String {
        self.video_id.clone().unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!(
                "{}_{}_{}",
                self.location.id,
                Utc::now().timestamp_millis(),
                &suffix[..9]
            )
        })
    }

    fn to_record(
        &self,
        video_id: String,
        filename: String,
        manifest: Uuid,
        duration: f64,
    ) -> VideoRecord {
        let now = Utc::now();
        let stream_tags = if self.stream_tags.is_empty() {
            vec![self.location.name.clone(), self.location.country.clone()]
        } else {
            self.stream_tags.clone()
        };

        VideoRecord {
            video_id,
            filename,
            manifest_ref: manifest,
            location_id: self.location.id.clone(),
            location_name: self.location.name.clone(),
            country: self.location.country.clone(),
            coordinates: self.location.coordinates,
            creator: self.creator.clone(),
            thumbnail_url: self
                .thumbnail_url
                .clone()
                .unwrap_or_else(|| "/placeholder.svg".into()),
            duration,
            views: self.views,
            likes: self.likes,
            virality_score: self.virality_score,
            token: self.token.clone(),
            betting_pool: self.betting_pool,
            paid_to_post: self.paid_to_post,
            categories: self.categories.clone(),
            stream_tags,
            xp_earned: self.xp_earned,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A file that made it into the store and the catalog.
#[derive(Debug)]
pub struct IngestOutcome {
    pub path: PathBuf,
    pub video_id: String,
    pub manifest: Manifest,
    pub duration: f64,
}

/// Per-file results of a batch run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub succeeded: Vec<IngestOutcome>,
    pub failed: Vec<(PathBuf, String)>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives uploads into the chunk store and records into the catalog.
#[derive(Clone)]
pub struct IngestPipeline {
    store: ChunkStore,
    catalog: Catalog,
    probe: DurationProbe,
}

impl IngestPipeline {
    pub fn new(store: ChunkStore, catalog: Catalog, probe: DurationProbe) -> Self {
        Self {
            store,
            catalog,
            probe,
        }
    }

    /// Upload one file and catalog it.
    pub async fn ingest_file(&self, entry: &IngestEntry) -> Result<IngestOutcome, IngestError> {
        let path = &entry.path;
        let io_err = |source| IngestError::Io {
            path: path.clone(),
            source,
        };

        let file = File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();

        let duration = match entry.duration {
            Some(secs) => secs,
            None => self.probe.measure(path).await,
        };
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = entry
            .content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(&filename).to_string());

        info!(
            file = %path.display(),
            "Duration: {:.2}s, Size: {:.2}MB",
            duration,
            size as f64 / (1024.0 * 1024.0)
        );

        let manifest = self
            .store
            .upload_stream(&filename, &content_type, ReaderStream::new(file))
            .await?;

        let video_id = entry.video_id();
        let record = entry.to_record(video_id.clone(), filename, manifest.id, duration);
        if let Err(err) = self.catalog.insert(&record).await {
            if let Err(cleanup) = self.store.delete_upload(manifest.id).await {
                error!(
                    manifest = %manifest.id,
                    error = %cleanup,
                    "failed to remove manifest after catalog insert failed"
                );
            }
            return Err(err.into());
        }

        Ok(IngestOutcome {
            path: path.clone(),
            video_id,
            manifest,
            duration,
        })
    }

    /// Ingest every entry in order. A failing file is logged and recorded;
    /// the rest of the batch still runs.
    pub async fn run_batch(&self, entries: &[IngestEntry]) -> IngestReport {
        let mut report = IngestReport::default();
        for (i, entry) in entries.iter().enumerate() {
            info!("Uploading {}/{}: {}", i + 1, entries.len(), entry.path.display());
            match self.ingest_file(entry).await {
                Ok(outcome) => {
                    info!(
                        video_id = %outcome.video_id,
                        manifest = %outcome.manifest.id,
                        "uploaded {}",
                        entry.path.display()
                    );
                    report.succeeded.push(outcome);
                }
                Err(err) => {
                    warn!(file = %entry.path.display(), error = %err, "upload failed");
                    report.failed.push((entry.path.clone(), err.to_string()));
                }
            }
        }
        report
    }

    /// Remove every cataloged video and its payload, ahead of a batch that
    /// replaces the whole catalog. Returns how many videos were removed.
    pub async fn clear_catalog(&self) -> Result<usize, IngestError> {
        let records = self.catalog.find_all().await?;
        for record in &records {
            self.remove_video(&record.video_id).await?;
        }
        info!(removed = records.len(), "cleared catalog");
        Ok(records.len())
    }

    /// Full removal: the catalog record, then its manifest and chunks.
    pub async fn remove_video(&self, video_id: &str) -> Result<VideoRecord, IngestError> {
        let record = self.catalog.delete_by_id(video_id).await?;
        self.store.delete_upload(record.manifest_ref).await?;
        info!(video_id, manifest = %record.manifest_ref, "removed video");
        Ok(record)
    }
}

/// Read a batch file: a JSON array of [`IngestEntry`]. Relative entry paths
/// resolve against the batch file's directory.
pub fn load_batch(path: &Path) -> anyhow::Result<Vec<IngestEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    let mut entries: Vec<IngestEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing batch file {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for entry in &mut entries {
        if entry.path.is_relative() {
            entry.path = base.join(&entry.path);
        }
    }
    Ok(entries)
}

/// Guess the MIME type from a file name's extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "ts" => "video/mp2t",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(guess_content_type("bali_tiny.mp4"), "video/mp4");
        assert_eq!(guess_content_type("CLIP.MOV"), "video/quicktime");
        assert_eq!(guess_content_type("clip.webm"), "video/webm");
        assert_eq!(guess_content_type("noext"), "application/octet-stream");
    }

    #[test]
    fn batch_paths_resolve_relative_to_batch_file() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("batch.json");
        std::fs::write(
            &batch,
            r#"[{
                "path": "clips/a.mp4",
                "location": {"id": "bali", "name": "Bali", "country": "Indonesia",
                             "coordinates": {"lat": -8.34, "lng": 115.09}},
                "creator": {"id": "creator1", "username": "@travel_explorer"}
            }]"#,
        )
        .unwrap();

        let entries = load_batch(&batch).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, dir.path().join("clips/a.mp4"));
        assert!(entries[0].duration.is_none());
    }

    #[test]
    fn generated_video_id_is_prefixed_by_location() {
        let entry: IngestEntry = serde_json::from_str(
            r#"{
                "path": "a.mp4",
                "location": {"id": "paris", "name": "Paris", "country": "France",
                             "coordinates": {"lat": 48.85, "lng": 2.35}},
                "creator": {"id": "c", "username": "@c"}
            }"#,
        )
        .unwrap();
        let id = entry.video_id();
        assert!(id.starts_with("paris_"));
        assert_eq!(id.split('_').count(), 3);

        let record = entry.to_record(id, "a.mp4".into(), Uuid::new_v4(), 3.0);
        assert_eq!(record.stream_tags, vec!["Paris", "France"]);
        assert!(record.validate().is_ok());
    }
}
