//! Core data models for the video stream store.
//!
//! `Manifest` describes a stored payload and its chunk layout; `VideoRecord`
//! is the descriptive catalog entry that points at exactly one manifest.
//! Both map to SQLite rows via `sqlx::FromRow` (directly or through a row
//! struct) and serialize as camelCase JSON via `serde`.

pub mod manifest;
pub mod video;
