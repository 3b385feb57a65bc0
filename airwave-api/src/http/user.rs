//! `user`-authenticated routes: submitting a song to the user queue and
//! withdrawing one's own pending submission.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::Serialize;

use airwave_core::ids::SongId;

use super::auth::UserAuth;
use super::error::{AppError, AppResult};
use super::AppState;
use airwave_control::queue::{AddSongRequest, MediaInput};

#[derive(Debug, Serialize)]
pub struct SongResponse {
    song_id: String,
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    duration_seconds: u64,
}

impl From<airwave_core::models::Song> for SongResponse {
    fn from(song: airwave_core::models::Song) -> Self {
        Self {
            song_id: song.song_id.to_string(),
            title: song.title,
            artist: song.artist,
            genre: song.genre,
            duration_seconds: song.duration_seconds,
        }
    }
}

/// `POST /api/queue/add` — multipart body with either a `url` field or a
/// `file` field (mutually exclusive), plus optional `song_name`/`artist`.
pub async fn add_song(
    State(state): State<AppState>,
    UserAuth(principal): UserAuth,
    mut multipart: Multipart,
) -> AppResult<Json<SongResponse>> {
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
            "url" => {
                url = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_input(format!("invalid url field: {e}")))?,
                );
            }
            "file" => {
                file_name = field.file_name().map(ToString::to_string);
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::bad_input(format!("invalid file field: {e}")))?
                        .to_vec(),
                );
            }
            "song_name" => {
                song_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_input(format!("invalid song_name field: {e}")))?,
                );
            }
            "artist" => {
                artist = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_input(format!("invalid artist field: {e}")))?,
                );
            }
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
        (Some(_), Some(_)) => {
            return Err(AppError::bad_input("provide either url or file, not both"));
        }
        (None, None) => {
            return Err(AppError::bad_input("provide either url or file"));
        }
    };

    let max_queue_songs = principal
        .max_queue_songs
        .ok_or_else(|| AppError::internal("user principal missing max_queue_songs"))?;
    let max_add_requests = principal
        .max_add_requests
        .ok_or_else(|| AppError::internal("user principal missing max_add_requests"))?;

    let song = state
        .queue
        .add_user_song(AddSongRequest {
            principal_id: principal.id,
            max_queue_songs,
            max_add_requests,
            media,
            song_name,
            artist,
        })
        .await?;

    Ok(Json(song.into()))
}

/// `DELETE /api/queue/{song_id}` — only the submitting principal may
/// withdraw their own song; ownership is enforced by the Queue Controller.
pub async fn delete_song(
    State(state): State<AppState>,
    UserAuth(principal): UserAuth,
    Path(song_id): Path<String>,
) -> AppResult<axum::http::StatusCode> {
    state
        .queue
        .delete_user_song(&principal.id, &SongId::from_string(song_id))
        .await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
