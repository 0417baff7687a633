//! Shared test harness for integration tests.
//!
//! [`TestHarness`] owns a temp directory holding a fresh SQLite database and
//! chunk directory, plus the [`AppState`] and router built on top of them.

#![allow(dead_code)]

use axum::{Router, body::Body};
use chrono::Utc;
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use vidstore::{
    config::{AppConfig, GlobalArgs},
    db,
    models::{
        manifest::Manifest,
        video::{Coordinates, Creator, VideoRecord},
    },
    routes::routes::build_router,
    services::{catalog_service::Catalog, chunk_store::ChunkStore},
    state::AppState,
};

pub const MIB: usize = 1024 * 1024;

pub struct TestHarness {
    pub dir: TempDir,
    pub state: AppState,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_chunk_size(MIB).await
    }

    pub async fn with_chunk_size(chunk_size: usize) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let chunks = dir.path().join("chunks");
        std::fs::create_dir_all(&chunks).unwrap();

        let args = GlobalArgs {
            storage_dir: Some(chunks.display().to_string()),
            database_url: Some(format!(
                "sqlite://{}",
                dir.path().join("meta.db").display()
            )),
            chunk_size: Some(chunk_size),
            public_base_url: Some("http://cdn.test".into()),
            ..Default::default()
        };
        let config = AppConfig::from_sources(&args, |_| None).unwrap();

        let pool = db::connect(&config.database_url, config.max_connections)
            .await
            .expect("failed to open database");
        db::run_migrations(&pool).await.unwrap();
        let pool = Arc::new(pool);

        let store = ChunkStore::new(pool.clone(), &config.storage_dir, config.chunk_size);
        let catalog = Catalog::new(pool);

        Self {
            dir,
            state: AppState::new(store, catalog, config),
        }
    }

    pub fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn store(&self) -> &ChunkStore {
        &self.state.store
    }

    pub fn catalog(&self) -> &Catalog {
        &self.state.catalog
    }

    /// Upload `data` in 64 KiB writes and commit it.
    pub async fn upload(&self, data: &[u8]) -> Manifest {
        let store = self.store();
        let mut handle = store.create_upload("clip.mp4", "video/mp4").await.unwrap();
        for piece in data.chunks(64 * 1024) {
            store.write(&mut handle, piece).await.unwrap();
        }
        store.commit_upload(handle).await.unwrap()
    }

    /// Upload a small payload and catalog it under `video_id` at `location_id`.
    pub async fn add_video(&self, video_id: &str, location_id: &str) -> VideoRecord {
        let manifest = self.upload(format!("payload of {video_id}").as_bytes()).await;
        let rec = record(video_id, location_id, manifest.id);
        self.catalog().insert(&rec).await.unwrap();
        rec
    }
}

/// Deterministic, non-repeating-per-chunk test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

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

pub async fn body_bytes(body: Body) -> Vec<u8> {
    body.collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(body: Body) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(body).await).unwrap()
}
