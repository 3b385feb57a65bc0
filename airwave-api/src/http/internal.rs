//! `internal`-authenticated routes: the mixer's source-auth and session
//! lifecycle callbacks. Reached only from the internal bind address — see
//! [`super::auth::InternalAuth`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use airwave_control::arbiter::{AuthOutcome, LivestreamMetadataTags};
use airwave_core::ids::{PrincipalId, SessionId};
use airwave_core::models::{DisconnectReason, Principal};

use super::auth::InternalAuth;
use super::error::AppResult;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthBody {
    #[serde(rename = "user")]
    #[allow(dead_code)]
    user: String,
    /// Carries the livestream bearer JWT, following the Icecast/Liquidsoap
    /// source-auth convention of passing the credential as a password.
    password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    accept: bool,
    reason: Option<String>,
    /// Not part of the minimal accept/reject contract, but the mixer has no
    /// other way to learn the session identifier it must echo back on
    /// `connect`/`disconnect`.
    session_id: Option<String>,
}

/// `POST /api/internal/livestream/auth` — a failed token verification is a
/// business outcome (`accept: false`), not an HTTP error: the mixer expects
/// a `200` either way.
pub async fn auth(
    State(state): State<AppState>,
    _: InternalAuth,
    Json(body): Json<AuthBody>,
) -> AppResult<Json<AuthResponse>> {
    let claims = match state.jwt.verify_livestream_token(&body.password) {
        Ok(claims) => claims,
        Err(_) => {
            return Ok(Json(AuthResponse {
                accept: false,
                reason: Some("invalid_token".to_string()),
                session_id: None,
            }));
        }
    };

    let show_id = match &claims.show_name {
        Some(name) => Some(state.catalog.shows.get_or_create_by_name(name).await?.show_id),
        None => None,
    };

    let principal = Principal::livestream(
        PrincipalId::from_string(claims.user_id),
        claims.max_streaming_seconds,
        claims.min_recording_duration,
        show_id,
    );

    match state.arbiter.auth(&principal, chrono::Utc::now()).await? {
        AuthOutcome::Accepted { session_id } => Ok(Json(AuthResponse {
            accept: true,
            reason: None,
            session_id: Some(session_id.to_string()),
        })),
        AuthOutcome::Rejected => Ok(Json(AuthResponse {
            accept: false,
            reason: Some("slot_occupied".to_string()),
            session_id: None,
        })),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    session_id: String,
}

/// `POST /api/internal/livestream/connect` — confirms the mixer has started
/// streaming the session the slot was reserved for.
pub async fn connect(
    State(state): State<AppState>,
    _: InternalAuth,
    Json(body): Json<ConnectBody>,
) -> AppResult<StatusCode> {
    state.arbiter.connect(&SessionId::from_string(body.session_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct DisconnectBody {
    session_id: String,
    reason: String,
}

fn parse_disconnect_reason(s: &str) -> DisconnectReason {
    match s {
        "limit" => DisconnectReason::Limit,
        "admin" => DisconnectReason::Admin,
        _ => DisconnectReason::Client,
    }
}

/// `POST /api/internal/livestream/disconnect`
pub async fn disconnect(
    State(state): State<AppState>,
    _: InternalAuth,
    Json(body): Json<DisconnectBody>,
) -> AppResult<StatusCode> {
    let reason = parse_disconnect_reason(&body.reason);
    state
        .arbiter
        .disconnect(&SessionId::from_string(body.session_id), reason, chrono::Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MetadataBody {
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    description: Option<String>,
}

/// `POST /api/internal/livestream/metadata` — the mixer's embedded-tag push.
pub async fn metadata(
    State(state): State<AppState>,
    _: InternalAuth,
    Json(body): Json<MetadataBody>,
) -> AppResult<StatusCode> {
    state
        .arbiter
        .set_metadata(LivestreamMetadataTags {
            title: body.title,
            artist: body.artist,
            genre: body.genre,
            description: body.description,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
