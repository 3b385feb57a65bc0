//! `admin`-authenticated routes: token issuance, queue administration,
//! playback control, recording deletion, and webhook management. None of
//! these enforce per-principal quotas — that's the point of the admin
//! token.

use std::str::FromStr;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use airwave_core::ids::{RecordingId, WebhookId};
use airwave_core::models::event::EventType;
use airwave_core::models::QueueKind;

use super::auth::AdminAuth;
use super::error::{AppError, AppResult};
use super::user::SongResponse;
use super::AppState;
use airwave_control::queue::MediaInput;

#[derive(Debug, Deserialize)]
pub struct IssueUserTokenBody {
    duration_seconds: i64,
    max_queue_songs: u32,
    max_add_requests: u32,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    token: String,
}

/// `POST /api/admin/token` — issues a bearer JWT for a `user` principal.
pub async fn issue_user_token(
    State(state): State<AppState>,
    _: AdminAuth,
    Json(body): Json<IssueUserTokenBody>,
) -> AppResult<Json<TokenResponse>> {
    if !(1..=86400).contains(&body.duration_seconds) {
        return Err(AppError::bad_input("duration_seconds must be between 1 and 86400"));
    }
    let token = state
        .jwt
        .issue_user_token(body.max_queue_songs, body.max_add_requests, body.duration_seconds)?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct IssueLivestreamTokenBody {
    max_streaming_seconds: u64,
    show_name: Option<String>,
    min_recording_duration: u64,
}

/// `POST /api/admin/livestream/token` — issues a bearer JWT carried as the
/// mixer's source-auth password.
pub async fn issue_livestream_token(
    State(state): State<AppState>,
    _: AdminAuth,
    Json(body): Json<IssueLivestreamTokenBody>,
) -> AppResult<Json<TokenResponse>> {
    if !(60..=28800).contains(&body.max_streaming_seconds) {
        return Err(AppError::bad_input("max_streaming_seconds must be between 60 and 28800"));
    }
    if body.min_recording_duration > 3600 {
        return Err(AppError::bad_input("min_recording_duration must be at most 3600"));
    }
    let token = state.jwt.issue_livestream_token(
        body.max_streaming_seconds,
        body.show_name,
        body.min_recording_duration,
    )?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Debug, Deserialize)]
pub struct PlaylistParam {
    playlist: String,
}

fn parse_playlist(param: &PlaylistParam) -> AppResult<QueueKind> {
    QueueKind::from_str(&param.playlist).map_err(AppError::from)
}

/// `POST /api/admin/queue/add?playlist=user|fallback` — bypasses every
/// quota and duplicate check the user-facing path enforces.
pub async fn add_song(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
    mut multipart: Multipart,
) -> AppResult<Json<SongResponse>> {
    let queue = parse_playlist(&param)?;

    let mut url: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut song_name: Option<String> = None;
    let mut artist: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_input(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "url" => url = Some(field.text().await.map_err(|e| AppError::bad_input(e.to_string()))?),
            "file" => {
                file_name = field.file_name().map(ToString::to_string);
                file_bytes = Some(field.bytes().await.map_err(|e| AppError::bad_input(e.to_string()))?.to_vec());
            }
            "song_name" => song_name = Some(field.text().await.map_err(|e| AppError::bad_input(e.to_string()))?),
            "artist" => artist = Some(field.text().await.map_err(|e| AppError::bad_input(e.to_string()))?),
            _ => {}
        }
    }

    let media = match (url, file_bytes) {
        (Some(url), None) => MediaInput::Url(url),
        (None, Some(bytes)) => {
            tokio::fs::create_dir_all(&state.config.queue.download_dir)
                .await
                .map_err(|e| AppError::internal(format!("failed to create upload directory: {e}")))?;
            let extension = file_name
                .as_deref()
                .and_then(|n| n.rsplit_once('.'))
                .map(|(_, ext)| ext)
                .unwrap_or("bin");
            let path = state
                .config
                .queue
                .download_dir
                .join(format!("{}.{extension}", airwave_core::ids::generate_id()));
            MediaInput::File {
                bytes,
                file_path: path.to_string_lossy().into_owned(),
            }
        }
        (Some(_), Some(_)) => return Err(AppError::bad_input("provide either url or file, not both")),
        (None, None) => return Err(AppError::bad_input("provide either url or file")),
    };

    let song = state.queue.add_admin_song(queue, media, song_name, artist).await?;
    Ok(Json(song.into()))
}

/// `GET /api/admin/queue/list?playlist=` — the full queue, unbounded.
pub async fn list_queue(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
) -> AppResult<Json<Vec<SongResponse>>> {
    let queue = parse_playlist(&param)?;
    let songs = state.queue.list(queue, None).await?;
    Ok(Json(songs.into_iter().map(Into::into).collect()))
}

/// `DELETE /api/admin/queue/{song_id}?playlist=`
pub async fn delete_song(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
    Path(song_id): Path<String>,
) -> AppResult<StatusCode> {
    let queue = parse_playlist(&param)?;
    state
        .queue
        .admin_delete_song(queue, &airwave_core::ids::SongId::from_string(song_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/queue/clear?playlist=`
pub async fn clear_queue(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
) -> AppResult<StatusCode> {
    let queue = parse_playlist(&param)?;
    state.queue.clear(queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/playback/play?playlist=`
pub async fn play(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
) -> AppResult<StatusCode> {
    let queue = parse_playlist(&param)?;
    state.queue.play(queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/playback/pause?playlist=`
pub async fn pause(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
) -> AppResult<StatusCode> {
    let queue = parse_playlist(&param)?;
    state.queue.pause(queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/admin/playback/resume?playlist=`
pub async fn resume(
    State(state): State<AppState>,
    _: AdminAuth,
    Query(param): Query<PlaylistParam>,
) -> AppResult<StatusCode> {
    let queue = parse_playlist(&param)?;
    state.queue.resume(queue).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/admin/recordings/{id}` — soft-deletes the catalog row, then
/// removes the underlying capture file from disk.
pub async fn delete_recording(
    State(state): State<AppState>,
    _: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let recording_id = RecordingId::from_string(id);
    let recording = state
        .catalog
        .recordings
        .get_by_id(&recording_id)
        .await?
        .ok_or_else(|| AppError::not_found("recording not found"))?;

    let deleted = state.catalog.recordings.delete(&recording_id).await?;
    if !deleted {
        return Err(AppError::not_found("recording not found"));
    }

    if let Err(e) = tokio::fs::remove_file(&recording.file_path).await {
        tracing::warn!(file_path = %recording.file_path, error = %e, "failed to remove recording file from disk");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SubscribeWebhookBody {
    url: String,
    events: Vec<EventType>,
    signing_key: String,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    webhook_id: String,
    url: String,
    events: Vec<EventType>,
    description: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<airwave_core::models::WebhookSubscription> for WebhookResponse {
    fn from(sub: airwave_core::models::WebhookSubscription) -> Self {
        Self {
            webhook_id: sub.webhook_id.to_string(),
            url: sub.url,
            events: sub.events,
            description: sub.description,
            created_at: sub.created_at,
        }
    }
}

/// `POST /api/admin/webhooks/subscribe`
pub async fn subscribe_webhook(
    State(state): State<AppState>,
    _: AdminAuth,
    Json(body): Json<SubscribeWebhookBody>,
) -> AppResult<Json<WebhookResponse>> {
    if body.signing_key.len() < 16 {
        return Err(AppError::bad_input("signing_key must be at least 16 characters"));
    }
    if body.events.is_empty() {
        return Err(AppError::bad_input("events must not be empty"));
    }
    let subscription = state
        .catalog
        .webhooks
        .subscribe(&body.url, &body.events, &body.signing_key, body.description.as_deref())
        .await?;
    Ok(Json(subscription.into()))
}

/// `GET /api/admin/webhooks/list`
pub async fn list_webhooks(State(state): State<AppState>, _: AdminAuth) -> AppResult<Json<Vec<WebhookResponse>>> {
    let subs = state.catalog.webhooks.list_all().await?;
    Ok(Json(subs.into_iter().map(Into::into).collect()))
}

/// `DELETE /api/admin/webhooks/{id}`
pub async fn unsubscribe_webhook(
    State(state): State<AppState>,
    _: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let removed = state.catalog.webhooks.unsubscribe(&WebhookId::from_string(id)).await?;
    if !removed {
        return Err(AppError::not_found("webhook not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    timestamp: chrono::DateTime<chrono::Utc>,
    event_type: EventType,
    url: String,
    status: &'static str,
    status_code: Option<u16>,
    error: Option<String>,
    latency_ms: u64,
}

impl From<airwave_core::models::WebhookDelivery> for DeliveryResponse {
    fn from(delivery: airwave_core::models::WebhookDelivery) -> Self {
        Self {
            timestamp: delivery.timestamp,
            event_type: delivery.event_type,
            url: delivery.url,
            status: match delivery.status {
                airwave_core::models::DeliveryStatus::Success => "success",
                airwave_core::models::DeliveryStatus::Failed => "failed",
            },
            status_code: delivery.status_code,
            error: delivery.error,
            latency_ms: delivery.latency_ms,
        }
    }
}

/// `GET /api/admin/webhooks/{id}/deliveries` — most recent 100, newest first.
pub async fn webhook_deliveries(
    State(state): State<AppState>,
    _: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<DeliveryResponse>>> {
    let deliveries = state
        .catalog
        .webhooks
        .deliveries_for(&WebhookId::from_string(id), 100)
        .await?;
    Ok(Json(deliveries.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Serialize)]
pub struct WebhookStats {
    total: u64,
    succeeded: u64,
    failed: u64,
    average_latency_ms: u64,
}

/// `GET /api/admin/webhooks/{id}/stats` — aggregated in-process from the
/// retained delivery log; no dedicated stats table backs this.
pub async fn webhook_stats(
    State(state): State<AppState>,
    _: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<Json<WebhookStats>> {
    let deliveries = state
        .catalog
        .webhooks
        .deliveries_for(&WebhookId::from_string(id), 100)
        .await?;

    let total = deliveries.len() as u64;
    let succeeded = deliveries
        .iter()
        .filter(|d| d.status == airwave_core::models::DeliveryStatus::Success)
        .count() as u64;
    let failed = total - succeeded;
    let average_latency_ms = if total == 0 {
        0
    } else {
        deliveries.iter().map(|d| d.latency_ms).sum::<u64>() / total
    };

    Ok(Json(WebhookStats {
        total,
        succeeded,
        failed,
        average_latency_ms,
    }))
}

/// `POST /api/admin/webhooks/{id}/test` — synchronously delivers a
/// `webhook_test` envelope and reports the outcome.
pub async fn test_webhook(
    State(state): State<AppState>,
    _: AdminAuth,
    Path(id): Path<String>,
) -> AppResult<Json<DeliveryResponse>> {
    let delivery = state.webhooks.test_delivery(&WebhookId::from_string(id)).await?;
    Ok(Json(delivery.into()))
}
