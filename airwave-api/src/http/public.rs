//! Unauthenticated routes: queue browsing, recordings search/playback, and
//! the now-playing projection. None of these mutate state.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use airwave_core::catalog::shows::ShowRepository;
use airwave_core::ids::RecordingId;
use airwave_core::models::{QueueKind, RecordingQuery, Source};

use super::error::AppResult;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQueueParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueEntry {
    song_id: String,
    title: Option<String>,
    artist: Option<String>,
    queue: QueueKind,
}

/// `GET /api/queue/list?limit=1..20` — the `user` queue only; the fallback
/// queue is an implementation detail of what plays between user requests,
/// not something a client browses.
pub async fn list_queue(
    State(state): State<AppState>,
    Query(params): Query<ListQueueParams>,
) -> AppResult<Json<Vec<QueueEntry>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 20);
    let songs = state.queue.list(QueueKind::User, Some(limit)).await?;
    Ok(Json(
        songs
            .into_iter()
            .map(|song| QueueEntry {
                song_id: song.song_id.to_string(),
                title: song.title,
                artist: song.artist,
                queue: song.queue,
            })
            .collect(),
    ))
}

#[derive(Debug, Serialize)]
pub struct RecordingEntry {
    id: String,
    session_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    description: Option<String>,
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct ShowGroup {
    show_id: Option<String>,
    show_name: Option<String>,
    recordings: Vec<RecordingEntry>,
}

#[derive(Debug, Serialize)]
pub struct RecordingsPage {
    page: u32,
    page_size: u32,
    total: i64,
    shows: Vec<ShowGroup>,
}

/// `GET /api/recordings/list` — paginated, filtered, then folded into
/// per-show groups client-side of the query (the repository already orders
/// by `show_id` so a single linear pass is enough).
pub async fn list_recordings(
    State(state): State<AppState>,
    Query(query): Query<RecordingQuery>,
) -> AppResult<Json<RecordingsPage>> {
    let (recordings, total) = state.catalog.recordings.list(&query).await?;

    let mut shows: Vec<ShowGroup> = Vec::new();
    for recording in recordings {
        let entry = RecordingEntry {
            id: recording.id.to_string(),
            session_id: recording.session_id.to_string(),
            created_at: recording.created_at,
            title: recording.title,
            artist: recording.artist,
            genre: recording.genre,
            description: recording.description,
            duration_seconds: recording.duration_seconds,
        };

        let show_id_str = recording.show_id.as_ref().map(ToString::to_string);
        match shows.last_mut() {
            Some(group) if group.show_id == show_id_str => group.recordings.push(entry),
            _ => {
                let show_name = match &recording.show_id {
                    Some(show_id) => ShowRepository::get_by_id(state.catalog.pool(), show_id)
                        .await?
                        .map(|show| show.show_name),
                    None => None,
                };
                shows.push(ShowGroup {
                    show_id: show_id_str,
                    show_name,
                    recordings: vec![entry],
                });
            }
        }
    }

    Ok(Json(RecordingsPage {
        page: query.page(),
        page_size: query.page_size(),
        total,
        shows,
    }))
}

/// `GET /api/recordings/stream/{id}` — serves the captured file with HTTP
/// Range support, since browser `<audio>` elements seek via byte ranges.
pub async fn stream_recording(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let recording = state
        .catalog
        .recordings
        .get_by_id(&RecordingId::from_string(id))
        .await?
        .ok_or_else(|| super::error::AppError::not_found("recording not found"))?;

    let mut file = tokio::fs::File::open(&recording.file_path)
        .await
        .map_err(|e| super::error::AppError::internal(format!("failed to open recording file: {e}")))?;
    let file_len = file
        .metadata()
        .await
        .map_err(|e| super::error::AppError::internal(format!("failed to stat recording file: {e}")))?
        .len();

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let (start, end, status) = match range.and_then(parse_range) {
        Some((start, end)) if start < file_len => (start, end.min(file_len.saturating_sub(1)), StatusCode::PARTIAL_CONTENT),
        _ => (0, file_len.saturating_sub(1), StatusCode::OK),
    };

    if status == StatusCode::PARTIAL_CONTENT {
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| super::error::AppError::internal(format!("failed to seek recording file: {e}")))?;
    }

    let length = end.saturating_sub(start) + 1;
    let mut buf = Vec::with_capacity(length as usize);
    file.take(length)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| super::error::AppError::internal(format!("failed to read recording file: {e}")))?;

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "audio/ogg")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, buf.len());
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{file_len}"));
    }

    builder
        .body(Body::from(buf))
        .map_err(|e| super::error::AppError::internal(format!("failed to build response: {e}")).into())
}

/// Parses a single-range `Range: bytes=start-end` header. Multi-range
/// requests fall back to serving the whole file.
fn parse_range(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() { u64::MAX } else { end.parse().ok()? };
    Some((start, end))
}

#[derive(Debug, Serialize)]
pub struct NowPlaying {
    source: Source,
    metadata: airwave_core::models::SongMetadata,
}

/// `GET /api/metadata/now` — a read-only snapshot of the same
/// occupied-slot/user-socket/fallback-socket precedence the Source Observer
/// uses to decide what to publish, without publishing anything itself.
pub async fn now_playing(State(state): State<AppState>) -> AppResult<Json<NowPlaying>> {
    let occupied = state.arbiter.slot().await?.occupied;

    let (source, metadata) = if occupied {
        let tags = state.arbiter.metadata().await?;
        (
            Source::Livestream,
            airwave_core::models::SongMetadata {
                title: tags.title,
                artist: tags.artist,
                genre: tags.genre,
            },
        )
    } else {
        let user_status = state.user_socket.status().await.unwrap_or_default();
        if user_status.playing {
            (Source::User, user_status.metadata)
        } else {
            let fallback_status = state.fallback_socket.status().await.unwrap_or_default();
            (Source::Fallback, fallback_status.metadata)
        }
    };

    Ok(Json(NowPlaying { source, metadata }))
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    status: &'static str,
}

pub async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct ReadinessBody {
    status: &'static str,
    state_store: bool,
    catalog_store: bool,
}

/// `GET /api/health/ready` — unlike `/health`, actually probes both
/// infrastructure dependencies so a load balancer can stop routing to a
/// replica that has lost its database or Redis connection.
pub async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessBody>) {
    let state_store = state.state_store.ping().await.is_ok();
    let catalog_store = state.catalog.ping().await.is_ok();
    let status = if state_store && catalog_store { "ok" } else { "degraded" };
    let code = if state_store && catalog_store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessBody {
            status,
            state_store,
            catalog_store,
        }),
    )
}
