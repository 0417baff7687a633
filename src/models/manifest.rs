//! Represents a stored payload (one uploaded video file) and its chunk layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Describes one payload held by the chunk store.
///
/// The manifest carries everything needed to resolve a byte range into chunk
/// reads: the total `length` and the `chunk_size` used when the payload was
/// written. The bytes themselves live in chunk files owned by the manifest.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Opaque identifier, assigned when the upload is created.
    pub id: Uuid,

    /// Display name of the uploaded file. Never used as a key.
    pub filename: String,

    /// MIME type declared at upload time.
    pub content_type: String,

    /// Total payload length in bytes.
    pub length: i64,

    /// Size of every chunk except possibly the last.
    pub chunk_size: i64,

    /// Number of persisted chunks.
    pub chunk_count: i64,

    /// Lowercase hex MD5 of the full payload.
    pub etag: Option<String>,

    /// When the upload was created.
    pub uploaded_at: DateTime<Utc>,
}

impl Manifest {
    /// Payload length as an unsigned byte count.
    pub fn len(&self) -> u64 {
        self.length.max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.length <= 0
    }

    /// Chunk count implied by `length` and `chunk_size`.
    pub fn expected_chunk_count(&self) -> i64 {
        expected_chunk_count(self.length, self.chunk_size)
    }
}

/// Number of chunks a payload of `length` bytes occupies at `chunk_size`.
pub fn expected_chunk_count(length: i64, chunk_size: i64) -> i64 {
    if length <= 0 || chunk_size <= 0 {
        return 0;
    }
    (length + chunk_size - 1) / chunk_size
}
