//! src/services/chunk_store.rs
//!
//! ChunkStore: range-addressable payload storage. Metadata (manifests and
//! per-chunk rows) lives in SQLite; payload bytes are split into fixed-size
//! chunk files on disk beneath `base_path/{shard}/{shard}/{manifest_id}/`.
//! Reads resolve a byte range to the chunks that cover it and stream only
//! those, so a seek never loads the whole payload.

use crate::models::manifest::{Manifest, expected_chunk_count};
use crate::services::{is_foreign_key_violation, is_unavailable};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, TryStreamExt, pin_mut, stream};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use uuid::Uuid;

/// Read buffer used when streaming a chunk file.
const READ_BUFFER: usize = 64 * 1024;

const MANIFEST_COLUMNS: &str =
    "id, filename, content_type, length, chunk_size, chunk_count, etag, uploaded_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("manifest `{0}` not found")]
    NotFound(Uuid),
    #[error("range {start}-{end} is not satisfiable for a payload of {length} bytes")]
    InvalidRange { start: u64, end: u64, length: u64 },
    #[error("upload `{0}` was committed without any data")]
    IncompleteUpload(Uuid),
    #[error("manifest `{id}` is inconsistent: {reason}")]
    CorruptManifest { id: Uuid, reason: String },
    #[error("manifest `{0}` is still referenced by a catalog record")]
    ManifestInUse(Uuid),
    #[error("backing storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),
    #[error(transparent)]
    Sqlx(sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unavailable(&err) {
            StoreError::StorageUnavailable(err)
        } else {
            StoreError::Sqlx(err)
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A lazy, finite sequence of payload bytes in ascending offset order.
///
/// Dropping it closes the chunk file currently open and stops further reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// An open range read: the manifest it belongs to, the resolved inclusive
/// bounds and the body stream covering exactly those bytes.
pub struct RangeRead {
    pub manifest: Manifest,
    pub start: u64,
    pub end: u64,
    pub body: ByteStream,
}

impl RangeRead {
    /// Number of bytes `body` will yield.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// The part of one chunk that a range read needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub seq: u64,
    /// Offset of the first wanted byte inside the chunk.
    pub offset: u64,
    /// Number of bytes wanted from this chunk.
    pub len: u64,
}

/// Write side of a pending upload.
///
/// Owned by exactly one writer; consumed by [`ChunkStore::commit_upload`] or
/// [`ChunkStore::abort_upload`].
pub struct UploadHandle {
    id: Uuid,
    dir: PathBuf,
    chunk_size: usize,
    buffer: Vec<u8>,
    next_seq: i64,
    written: u64,
    digest: Context,
}

impl UploadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

/// ChunkStore provides the payload side of the system:
/// - Create an upload, append bytes linearly, commit it into an immutable manifest
/// - Open a byte-range read that streams only the chunks covering the range
/// - Delete a manifest together with every chunk it owns
///
/// Cloning is cheap; clones share the pool and the base directory.
#[derive(Clone)]
pub struct ChunkStore {
    /// Shared SQLite connection pool used for manifest and chunk rows.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where chunk files are stored.
    pub base_path: PathBuf,

    chunk_size: usize,
}

impl ChunkStore {
    /// Create a ChunkStore backed by the provided SQLite pool, writing chunk
    /// files under `base_path`. New uploads are split at `chunk_size` bytes.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Generate two-level shard identifiers for a manifest.
    ///
    /// Uses MD5(id) and returns the first two bytes as lowercase hex, which
    /// keeps the number of entries per directory small.
    fn manifest_shards(id: Uuid) -> (String, String) {
        let digest = md5::compute(id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Directory owning every chunk file of a manifest.
    fn manifest_dir(&self, id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::manifest_shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    /// Allocate a pending manifest and return a handle accepting sequential
    /// writes.
    pub async fn create_upload(
        &self,
        filename: &str,
        content_type: &str,
    ) -> StoreResult<UploadHandle> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO manifests (id, filename, content_type, chunk_size, uploaded_at, committed)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(id)
        .bind(filename)
        .bind(content_type)
        .bind(self.chunk_size as i64)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        let dir = self.manifest_dir(id);
        if let Err(err) = fs::create_dir_all(&dir).await {
            self.discard(id).await;
            return Err(StoreError::Io(err));
        }

        debug!(%id, filename, "created pending upload");
        Ok(UploadHandle {
            id,
            dir,
            chunk_size: self.chunk_size,
            buffer: Vec::with_capacity(self.chunk_size),
            next_seq: 0,
            written: 0,
            digest: Context::new(),
        })
    }

    /// Append bytes to an upload, persisting a chunk each time the buffer
    /// reaches the chunk size.
    pub async fn write(&self, handle: &mut UploadHandle, mut bytes: &[u8]) -> StoreResult<()> {
        handle.digest.consume(bytes);
        handle.written += bytes.len() as u64;

        while !bytes.is_empty() {
            let room = handle.chunk_size - handle.buffer.len();
            let take = room.min(bytes.len());
            handle.buffer.extend_from_slice(&bytes[..take]);
            bytes = &bytes[take..];

            if handle.buffer.len() == handle.chunk_size {
                self.flush_chunk(handle).await?;
            }
        }
        Ok(())
    }

    /// Persist the buffered bytes as the next chunk. No-op on an empty buffer.
    async fn flush_chunk(&self, handle: &mut UploadHandle) -> StoreResult<()> {
        if handle.buffer.is_empty() {
            return Ok(());
        }

        let seq = handle.next_seq;
        let path = handle.dir.join(chunk_file_name(seq as u64));
        let mut file = File::create(&path).await?;
        file.write_all(&handle.buffer).await?;
        file.flush().await?;
        file.sync_all().await?;

        sqlx::query("INSERT INTO chunks (manifest_id, seq, size_bytes) VALUES (?, ?, ?)")
            .bind(handle.id)
            .bind(seq)
            .bind(handle.buffer.len() as i64)
            .execute(&*self.db)
            .await?;

        debug!(id = %handle.id, seq, size = handle.buffer.len(), "flushed chunk");
        handle.buffer.clear();
        handle.next_seq += 1;
        Ok(())
    }

    /// Flush the final partial chunk, verify the chunk layout and mark the
    /// manifest committed and immutable.
    ///
    /// A handle with no bytes written is rejected with `IncompleteUpload` and
    /// its pending manifest discarded. Any failure discards the upload.
    pub async fn commit_upload(&self, mut handle: UploadHandle) -> StoreResult<Manifest> {
        let id = handle.id;
        if handle.written == 0 {
            self.discard(id).await;
            return Err(StoreError::IncompleteUpload(id));
        }

        match self.finish_commit(&mut handle).await {
            Ok(manifest) => Ok(manifest),
            Err(err) => {
                warn!(%id, error = %err, "commit failed, discarding upload");
                self.discard(id).await;
                Err(err)
            }
        }
    }

    async fn finish_commit(&self, handle: &mut UploadHandle) -> StoreResult<Manifest> {
        self.flush_chunk(handle).await?;

        let id = handle.id;
        let length = handle.written as i64;
        let chunk_size = handle.chunk_size as i64;
        let chunk_count = self.verify_layout(id, length, chunk_size).await?;
        let etag = format!("{:x}", std::mem::replace(&mut handle.digest, Context::new()).compute());

        let result = sqlx::query(
            "UPDATE manifests SET length = ?, chunk_count = ?, etag = ?, committed = 1
             WHERE id = ? AND committed = 0",
        )
        .bind(length)
        .bind(chunk_count)
        .bind(&etag)
        .bind(id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::CorruptManifest {
                id,
                reason: "pending manifest disappeared before commit".into(),
            });
        }

        let manifest = self.get_manifest(id).await?;
        tracing::info!(%id, length, chunk_count, "committed upload");
        Ok(manifest)
    }

    /// Check that the persisted chunks tile `length` exactly: contiguous
    /// sequence numbers from 0, every chunk but the last full-sized.
    async fn verify_layout(&self, id: Uuid, length: i64, chunk_size: i64) -> StoreResult<i64> {
        let expected = expected_chunk_count(length, chunk_size);
        let (count, total, max_seq, short): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(size_bytes), 0),
                    COALESCE(MAX(seq), -1),
                    COALESCE(SUM(CASE WHEN seq < ? AND size_bytes != ? THEN 1 ELSE 0 END), 0)
             FROM chunks WHERE manifest_id = ?",
        )
        .bind(expected - 1)
        .bind(chunk_size)
        .bind(id)
        .fetch_one(&*self.db)
        .await?;

        let reason = if count != expected {
            Some(format!("expected {expected} chunks, found {count}"))
        } else if max_seq != expected - 1 {
            Some(format!("chunk sequence ends at {max_seq}, expected {}", expected - 1))
        } else if total != length {
            Some(format!("chunks hold {total} bytes, expected {length}"))
        } else if short != 0 {
            Some(format!("{short} non-final chunks are not {chunk_size} bytes"))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(StoreError::CorruptManifest { id, reason }),
            None => Ok(count),
        }
    }

    /// Discard a pending upload and everything written for it so far.
    pub async fn abort_upload(&self, handle: UploadHandle) {
        debug!(id = %handle.id, "aborting upload");
        self.discard(handle.id).await;
    }

    /// Stream-upload a payload: create, write every item, commit.
    ///
    /// Any stream or storage error aborts the upload, leaving nothing behind.
    pub async fn upload_stream<S>(
        &self,
        filename: &str,
        content_type: &str,
        stream: S,
    ) -> StoreResult<Manifest>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let mut handle = self.create_upload(filename, content_type).await?;

        pin_mut!(stream);
        while let Some(item) = stream.next().await {
            let result = match item {
                Ok(bytes) => self.write(&mut handle, &bytes).await,
                Err(err) => Err(StoreError::Io(err)),
            };
            if let Err(err) = result {
                self.abort_upload(handle).await;
                return Err(err);
            }
        }

        self.commit_upload(handle).await
    }

    /// Fetch a committed manifest.
    pub async fn get_manifest(&self, id: Uuid) -> StoreResult<Manifest> {
        sqlx::query_as::<_, Manifest>(&format!(
            "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE id = ? AND committed = 1"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or(StoreError::NotFound(id))
    }

    /// All committed manifests, oldest first.
    pub async fn list_manifests(&self) -> StoreResult<Vec<Manifest>> {
        let rows = sqlx::query_as::<_, Manifest>(&format!(
            "SELECT {MANIFEST_COLUMNS} FROM manifests WHERE committed = 1
             ORDER BY uploaded_at ASC, id ASC"
        ))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Open a read over `[start, end]` inclusive (defaults: the whole payload).
    ///
    /// `end` past the payload is clamped to the last byte; a `start` past the
    /// payload or after `end` is rejected with `InvalidRange`. The first chunk
    /// is opened before returning, so a missing or short chunk file surfaces
    /// here as `Io`. Later chunks open as the body is polled.
    pub async fn open_read(
        &self,
        id: Uuid,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<RangeRead> {
        let manifest = self.get_manifest(id).await?;
        self.read_range(manifest, start, end).await
    }

    /// Like [`open_read`](Self::open_read) for a manifest the caller already
    /// fetched.
    pub async fn read_range(
        &self,
        manifest: Manifest,
        start: Option<u64>,
        end: Option<u64>,
    ) -> StoreResult<RangeRead> {
        let (start, end) = resolve_range(start, end, manifest.len())?;
        let mut spans = plan_chunks(manifest.chunk_size as u64, start, end).into_iter();
        let Some(first) = spans.next() else {
            return Err(StoreError::CorruptManifest {
                id: manifest.id,
                reason: format!("no chunk covers bytes {start}-{end}"),
            });
        };

        let dir = self.manifest_dir(manifest.id);
        let head = open_span(dir.join(chunk_file_name(first.seq)), first)
            .await
            .inspect_err(|err| warn!(id = %manifest.id, error = %err, "cannot open first chunk"))?;
        let body: ByteStream = Box::pin(head.chain(chunk_stream(dir, spans.collect())));

        debug!(id = %manifest.id, start, end, "opened range read");
        Ok(RangeRead {
            manifest,
            start,
            end,
            body,
        })
    }

    /// Remove a manifest and every chunk it owns.
    ///
    /// Deleting an unknown or already-deleted id succeeds. A manifest still
    /// referenced by a catalog record is refused with `ManifestInUse`.
    pub async fn delete_upload(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM manifests WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                debug!(%id, "manifest already deleted");
            }
            Ok(_) => debug!(%id, "deleted manifest rows"),
            Err(err) if is_foreign_key_violation(&err) => {
                return Err(StoreError::ManifestInUse(id));
            }
            Err(err) => return Err(err.into()),
        }

        self.remove_chunk_dir(id).await
    }

    /// Remove pending manifests older than `older_than`, left behind by
    /// uploads that never reached commit or abort.
    pub async fn sweep_pending(&self, older_than: chrono::Duration) -> StoreResult<usize> {
        let cutoff = Utc::now() - older_than;
        let pending: Vec<(Uuid, chrono::DateTime<Utc>)> =
            sqlx::query_as("SELECT id, uploaded_at FROM manifests WHERE committed = 0")
                .fetch_all(&*self.db)
                .await?;

        let mut swept = 0;
        for (id, uploaded_at) in pending {
            if uploaded_at < cutoff {
                self.discard(id).await;
                swept += 1;
            }
        }
        if swept > 0 {
            tracing::info!(swept, "removed stale pending uploads");
        }
        Ok(swept)
    }

    /// Best-effort removal of a manifest's rows and files, used on failure
    /// paths where the original error is what the caller needs to see.
    async fn discard(&self, id: Uuid) {
        if let Err(err) = sqlx::query("DELETE FROM manifests WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await
        {
            warn!(%id, error = %err, "failed to delete manifest rows while discarding upload");
        }
        if let Err(err) = self.remove_chunk_dir(id).await {
            warn!(%id, error = %err, "failed to delete chunk files while discarding upload");
        }
    }

    async fn remove_chunk_dir(&self, id: Uuid) -> StoreResult<()> {
        let dir = self.manifest_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("removed chunk directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("chunk directory {} already missing", dir.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = dir.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    /// Recursively remove empty shard directories up to the base path.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

fn chunk_file_name(seq: u64) -> String {
    format!("{seq:08}.chunk")
}

/// Resolve optional inclusive bounds against a payload length.
pub fn resolve_range(start: Option<u64>, end: Option<u64>, length: u64) -> StoreResult<(u64, u64)> {
    let start = start.unwrap_or(0);
    let last = length.saturating_sub(1);
    let end_req = end.unwrap_or(last);

    if length == 0 || start > end_req || start >= length {
        return Err(StoreError::InvalidRange {
            start,
            end: end_req,
            length,
        });
    }
    Ok((start, end_req.min(last)))
}

/// Map an inclusive byte range onto the chunks that cover it, in order.
pub fn plan_chunks(chunk_size: u64, start: u64, end: u64) -> Vec<ChunkSpan> {
    if chunk_size == 0 || start > end {
        return Vec::new();
    }
    let first = start / chunk_size;
    let last = end / chunk_size;

    (first..=last)
        .map(|seq| {
            let chunk_start = seq * chunk_size;
            let chunk_end = chunk_start + chunk_size - 1;
            let from = start.max(chunk_start) - chunk_start;
            let to = end.min(chunk_end) - chunk_start;
            ChunkSpan {
                seq,
                offset: from,
                len: to - from + 1,
            }
        })
        .collect()
}

/// Lazily open each span's chunk file in order and flatten their bytes.
fn chunk_stream(dir: PathBuf, spans: Vec<ChunkSpan>) -> ByteStream {
    let stream = stream::iter(spans)
        .then(move |span| {
            let path = dir.join(chunk_file_name(span.seq));
            async move { open_span(path, span).await }
        })
        .try_flatten();
    Box::pin(stream)
}

async fn open_span(path: PathBuf, span: ChunkSpan) -> io::Result<ReaderStream<Take<File>>> {
    let mut file = File::open(&path).await?;
    let available = file.metadata().await?.len();
    if available < span.offset + span.len {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "chunk {} holds {} bytes, need {}",
                path.display(),
                available,
                span.offset + span.len
            ),
        ));
    }
    if span.offset > 0 {
        file.seek(SeekFrom::Start(span.offset)).await?;
    }
    Ok(ReaderStream::with_capacity(
        file.take(span.len),
        READ_BUFFER,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn read_all(mut body: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    async fn upload(store: &ChunkStore, data: &[u8], write_size: usize) -> Manifest {
        let mut handle = store.create_upload("clip.mp4", "video/mp4").await.unwrap();
        for piece in data.chunks(write_size) {
            store.write(&mut handle, piece).await.unwrap();
        }
        store.commit_upload(handle).await.unwrap()
    }

    #[test]
    fn plan_covers_single_chunk() {
        assert_eq!(
            plan_chunks(10, 3, 6),
            vec![ChunkSpan {
                seq: 0,
                offset: 3,
                len: 4
            }]
        );
    }

    #[test]
    fn plan_spans_chunk_boundaries() {
        let spans = plan_chunks(10, 7, 25);
        assert_eq!(
            spans,
            vec![
                ChunkSpan { seq: 0, offset: 7, len: 3 },
                ChunkSpan { seq: 1, offset: 0, len: 10 },
                ChunkSpan { seq: 2, offset: 0, len: 6 },
            ]
        );
        assert_eq!(spans.iter().map(|s| s.len).sum::<u64>(), 25 - 7 + 1);
    }

    #[test]
    fn plan_exact_chunk_edges() {
        let spans = plan_chunks(10, 10, 19);
        assert_eq!(spans, vec![ChunkSpan { seq: 1, offset: 0, len: 10 }]);
    }

    #[test]
    fn resolve_defaults_and_clamps() {
        assert_eq!(resolve_range(None, None, 100).unwrap(), (0, 99));
        assert_eq!(resolve_range(Some(50), None, 100).unwrap(), (50, 99));
        assert_eq!(resolve_range(Some(10), Some(1_000), 100).unwrap(), (10, 99));
        assert_eq!(resolve_range(Some(99), Some(99), 100).unwrap(), (99, 99));
    }

    #[test]
    fn resolve_rejects_unsatisfiable() {
        assert!(matches!(
            resolve_range(Some(100), None, 100),
            Err(StoreError::InvalidRange { .. })
        ));
        assert!(matches!(
            resolve_range(Some(20), Some(10), 100),
            Err(StoreError::InvalidRange { .. })
        ));
        assert!(resolve_range(None, None, 0).is_err());
    }

    #[tokio::test]
    async fn round_trip_full_payload() {
        let (_dir, store, _) = testing::services(1024).await;
        let data = payload(10 * 1024 + 17);
        let manifest = upload(&store, &data, 700).await;

        assert_eq!(manifest.length, data.len() as i64);
        assert_eq!(manifest.chunk_count, 11);
        assert_eq!(manifest.chunk_size, 1024);
        assert_eq!(
            manifest.etag.as_deref(),
            Some(format!("{:x}", md5::compute(&data)).as_str())
        );

        let read = store.open_read(manifest.id, None, None).await.unwrap();
        assert_eq!(read.content_length(), data.len() as u64);
        assert_eq!(read_all(read.body).await, data);
    }

    #[tokio::test]
    async fn sub_ranges_match_payload_slices() {
        let (_dir, store, _) = testing::services(64).await;
        let data = payload(1000);
        let manifest = upload(&store, &data, 1000).await;

        for (start, end) in [(0, 0), (63, 64), (100, 355), (500, 999), (999, 999), (1, 998)] {
            let read = store
                .open_read(manifest.id, Some(start), Some(end))
                .await
                .unwrap();
            assert_eq!(read.content_length(), end - start + 1);
            let bytes = read_all(read.body).await;
            assert_eq!(bytes, &data[start as usize..=end as usize], "range {start}-{end}");
        }
    }

    #[tokio::test]
    async fn end_past_payload_is_clamped() {
        let (_dir, store, _) = testing::services(64).await;
        let data = payload(200);
        let manifest = upload(&store, &data, 33).await;

        let read = store
            .open_read(manifest.id, Some(150), Some(10_000))
            .await
            .unwrap();
        assert_eq!((read.start, read.end), (150, 199));
        assert_eq!(read_all(read.body).await, &data[150..]);
    }

    #[tokio::test]
    async fn start_past_payload_is_invalid() {
        let (_dir, store, _) = testing::services(64).await;
        let manifest = upload(&store, &payload(200), 200).await;

        let err = store
            .open_read(manifest.id, Some(200), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::InvalidRange { length: 200, .. }));
    }

    #[tokio::test]
    async fn empty_commit_is_rejected_and_discarded() {
        let (_dir, store, _) = testing::services(64).await;
        let handle = store.create_upload("empty.mp4", "video/mp4").await.unwrap();
        let id = handle.id();

        let err = store.commit_upload(handle).await.err().unwrap();
        assert!(matches!(err, StoreError::IncompleteUpload(got) if got == id));
        assert!(matches!(
            store.get_manifest(id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.manifest_dir(id).exists());
    }

    #[tokio::test]
    async fn unknown_manifest_is_not_found() {
        let (_dir, store, _) = testing::services(64).await;
        let err = store.open_read(Uuid::new_v4(), None, None).await.err().unwrap();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_upload_is_not_readable() {
        let (_dir, store, _) = testing::services(64).await;
        let mut handle = store.create_upload("p.mp4", "video/mp4").await.unwrap();
        store.write(&mut handle, &payload(100)).await.unwrap();

        assert!(matches!(
            store.get_manifest(handle.id()).await,
            Err(StoreError::NotFound(_))
        ));
        store.abort_upload(handle).await;
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_chunks() {
        let (_dir, store, _) = testing::services(64).await;
        let manifest = upload(&store, &payload(300), 300).await;
        let dir = store.manifest_dir(manifest.id);
        assert!(dir.join(chunk_file_name(4)).exists());

        store.delete_upload(manifest.id).await.unwrap();
        store.delete_upload(manifest.id).await.unwrap();

        assert!(!dir.exists());
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE manifest_id = ?")
            .bind(manifest.id)
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(matches!(
            store.open_read(manifest.id, None, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn truncated_chunk_fails_the_stream() {
        let (_dir, store, _) = testing::services(64).await;
        let manifest = upload(&store, &payload(200), 200).await;
        let victim = store.manifest_dir(manifest.id).join(chunk_file_name(1));
        fs::write(&victim, b"short").await.unwrap();

        let mut body = store.open_read(manifest.id, None, None).await.unwrap().body;
        let first = body.next().await.unwrap();
        assert!(first.is_ok());
        let mut saw_error = false;
        while let Some(item) = body.next().await {
            if item.is_err() {
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn missing_first_chunk_fails_before_streaming() {
        let (_dir, store, _) = testing::services(64).await;
        let manifest = upload(&store, &payload(200), 200).await;
        fs::remove_dir_all(store.manifest_dir(manifest.id)).await.unwrap();

        let err = store.open_read(manifest.id, Some(70), None).await.err().unwrap();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn dropped_body_stops_reading() {
        let (_dir, store, _) = testing::services(64).await;
        let data = payload(640);
        let manifest = upload(&store, &data, 640).await;

        let mut body = store.open_read(manifest.id, None, None).await.unwrap().body;
        let first = body.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        assert!(data.starts_with(&first));
        drop(body);

        store.delete_upload(manifest.id).await.unwrap();
        assert!(!store.manifest_dir(manifest.id).exists());
    }

    #[tokio::test]
    async fn commit_detects_missing_chunk_row() {
        let (_dir, store, _) = testing::services(64).await;
        let mut handle = store.create_upload("gap.mp4", "video/mp4").await.unwrap();
        let id = handle.id();
        store.write(&mut handle, &payload(150)).await.unwrap();

        sqlx::query("DELETE FROM chunks WHERE manifest_id = ? AND seq = 1")
            .bind(id)
            .execute(&*store.db)
            .await
            .unwrap();

        let err = store.commit_upload(handle).await.err().unwrap();
        assert!(matches!(err, StoreError::CorruptManifest { id: got, .. } if got == id));
        assert!(matches!(
            store.get_manifest(id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.manifest_dir(id).exists());
    }

    #[tokio::test]
    async fn closed_pool_is_storage_unavailable() {
        let (_dir, store, _) = testing::services(64).await;
        store.db.close().await;

        let err = store
            .create_upload("late.mp4", "video/mp4")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn upload_stream_aborts_on_stream_error() {
        let (_dir, store, _) = testing::services(64).await;
        let items: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from(payload(100))),
            Err(io::Error::new(ErrorKind::BrokenPipe, "source went away")),
        ];

        let err = store
            .upload_stream("broken.mp4", "video/mp4", stream::iter(items))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Io(_)));

        let pending: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manifests")
            .fetch_one(&*store.db)
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_pending_uploads() {
        let (_dir, store, _) = testing::services(64).await;
        let committed = upload(&store, &payload(10), 10).await;
        let handle = store.create_upload("stale.mp4", "video/mp4").await.unwrap();

        assert_eq!(
            store.sweep_pending(chrono::Duration::hours(1)).await.unwrap(),
            0
        );
        assert_eq!(
            store
                .sweep_pending(chrono::Duration::seconds(-1))
                .await
                .unwrap(),
            1
        );

        assert!(!store.manifest_dir(handle.id()).exists());
        assert!(store.get_manifest(committed.id).await.is_ok());
        assert_eq!(store.list_manifests().await.unwrap().len(), 1);
    }
}
