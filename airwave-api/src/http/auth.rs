//! Principal extraction: turns an `Authorization: Bearer <token>` header
//! into an `AdminAuth`/`UserAuth`/`InternalAuth` marker, matching admin and
//! internal tokens against configuration and user tokens against the JWT
//! service. Livestream JWTs are verified inline by the internal `auth`
//! handler instead, since the mixer carries that credential in a request
//! body field rather than a header.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use airwave_core::ids::PrincipalId;
use airwave_core::models::Principal;

use super::error::AppError;
use super::AppState;

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthenticated("missing authorization header"))?;
    let value = header
        .to_str()
        .map_err(|_| AppError::unauthenticated("authorization header is not valid UTF-8"))?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::unauthenticated("expected a bearer token"))
}

/// Authenticated admin principal. Admin tokens are opaque strings matched
/// against the configured set — never JWTs.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if state.config.admin.tokens.iter().any(|t| t == token) {
            Ok(Self)
        } else {
            Err(AppError::unauthenticated("invalid admin token"))
        }
    }
}

/// Authenticated `user` principal, resolved from a verified user JWT.
pub struct UserAuth(pub Principal);

impl FromRequestParts<AppState> for UserAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let claims = state
            .jwt
            .verify_user_token(token)
            .map_err(|_| AppError::unauthenticated("invalid or expired user token"))?;
        Ok(Self(Principal::user(
            PrincipalId::from_string(claims.user_id),
            claims.max_queue_songs,
            claims.max_add_requests,
        )))
    }
}

/// Authenticated internal principal: bearer must match `INTERNAL_API_TOKEN`
/// and, as defense in depth against a misconfigured reverse proxy, the
/// connecting peer must be the configured internal bind address or
/// loopback.
pub struct InternalAuth;

impl FromRequestParts<AppState> for InternalAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        if token != state.config.admin.internal_token {
            return Err(AppError::unauthenticated("invalid internal token"));
        }

        let ConnectInfo(addr) = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .copied()
            .ok_or_else(|| AppError::forbidden("internal endpoint reached without connection info"))?;

        let allowed = state
            .config
            .server
            .internal_bind
            .parse()
            .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
        if addr.ip() != allowed && !addr.ip().is_loopback() {
            tracing::warn!(peer = %addr, "rejected internal endpoint call from non-loopback peer");
            return Err(AppError::forbidden("internal endpoint not reachable from this address"));
        }

        Ok(Self)
    }
}
