//! Range streaming of stored payloads.
//!
//! - GET  /api/videos/stream/{manifestId}  -> 200 full body or 206 partial body
//! - HEAD /api/videos/stream/{manifestId}  -> same headers, no body
//!
//! Only a single `bytes=` range is honoured; the unit is matched without
//! regard to case. A header that does not parse (including multi-range
//! requests) is ignored and the full payload is sent.

use crate::{
    errors::AppError,
    models::manifest::Manifest,
    services::chunk_store::{ByteStream, RangeRead, StoreError},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt, stream};
use std::{io, time::Duration};
use uuid::Uuid;

const PAYLOAD_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A single byte range as requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=START-` or `bytes=START-END`
    From { start: u64, end: Option<u64> },
    /// `bytes=-N`: the last N bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Inclusive start and optional end against a payload of `length` bytes.
    fn bounds(self, length: u64) -> Result<(u64, Option<u64>), StoreError> {
        match self {
            ByteRange::From { start, end } => Ok((start, end)),
            ByteRange::Suffix(0) => Err(StoreError::InvalidRange {
                start: length,
                end: length,
                length,
            }),
            ByteRange::Suffix(n) => Ok((length.saturating_sub(n), None)),
        }
    }
}

/// Parse a `Range` header value. `None` means "serve the whole payload".
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let (unit, ranges) = value.trim().split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return None;
    }
    if ranges.contains(',') {
        return None;
    }
    let (start, end) = ranges.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    match (start.is_empty(), end.is_empty()) {
        (true, true) => None,
        (true, false) => end.parse().ok().map(ByteRange::Suffix),
        (false, _) => {
            let start: u64 = start.parse().ok()?;
            let end: Option<u64> = if end.is_empty() {
                None
            } else {
                Some(end.parse().ok()?)
            };
            match end {
                Some(end) if end < start => None,
                _ => Some(ByteRange::From { start, end }),
            }
        }
    }
}

/// `GET /api/videos/stream/{manifestId}`
pub async fn stream_video(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (read, partial) = open(&state, &file_id, &headers).await?;
    let id = read.manifest.id;
    tracing::debug!(
        manifest = %id,
        start = read.start,
        end = read.end,
        partial,
        "streaming payload"
    );

    let RangeRead {
        manifest,
        start,
        end,
        body,
    } = read;
    let body = Body::from_stream(guard_stream(body, state.config.stream_idle_timeout, id));
    respond(&manifest, start, end, partial, body)
}

/// `HEAD /api/videos/stream/{manifestId}`
///
/// Resolves the range exactly like GET, so errors and headers agree, but
/// never polls the body.
pub async fn head_video(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (read, partial) = open(&state, &file_id, &headers).await?;
    respond(&read.manifest, read.start, read.end, partial, Body::empty())
}

async fn open(
    state: &AppState,
    file_id: &str,
    headers: &HeaderMap,
) -> Result<(RangeRead, bool), AppError> {
    let id = Uuid::parse_str(file_id).map_err(|_| AppError::bad_request("Invalid file ID"))?;
    let manifest = state.store.get_manifest(id).await?;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let read = match range {
        None => state.store.read_range(manifest, None, None).await?,
        Some(range) => {
            let (start, end) = range.bounds(manifest.len())?;
            state.store.read_range(manifest, Some(start), end).await?
        }
    };
    Ok((read, range.is_some()))
}

fn respond(
    manifest: &Manifest,
    start: u64,
    end: u64,
    partial: bool,
    body: Body,
) -> Result<Response, AppError> {
    let status = if partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type(manifest))
        .header(header::CONTENT_LENGTH, end - start + 1)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, PAYLOAD_CACHE_CONTROL)
        .header(
            header::LAST_MODIFIED,
            manifest.uploaded_at.format(HTTP_DATE).to_string(),
        );
    if let Some(etag) = &manifest.etag {
        builder = builder.header(header::ETAG, format!("\"{}\"", etag));
    }
    if partial {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, manifest.len()),
        );
    }

    builder
        .body(body)
        .map_err(|e| AppError::internal("Failed to stream video").with_message(e.to_string()))
}

fn content_type(manifest: &Manifest) -> HeaderValue {
    HeaderValue::from_str(&manifest.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Wrap a payload stream so that a stalled read ends the response and a
/// failed read is logged. Headers are already on the wire by then, so the
/// client only sees a truncated body. Nothing is polled after an error.
///
/// The timer only runs while the body is being polled. A client that stops
/// reading leaves hyper waiting on the socket, and the open chunk file is
/// released only when the connection itself is dropped.
fn guard_stream(
    body: ByteStream,
    idle: Duration,
    id: Uuid,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(Some(body), move |body| async move {
        let mut body = body?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(bytes))) => Some((Ok(bytes), Some(body))),
            Ok(Some(Err(err))) => {
                tracing::error!(manifest = %id, error = %err, "payload read failed mid-stream");
                Some((Err(err), None))
            }
            Ok(None) => None,
            Err(_) => {
                tracing::warn!(manifest = %id, ?idle, "payload stream stalled, closing");
                Some((
                    Err(io::Error::new(io::ErrorKind::TimedOut, "payload read stalled")),
                    None,
                ))
            }
        }
    })
}
