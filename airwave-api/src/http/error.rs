// HTTP error handling: maps the internal error taxonomy onto status codes.
// `unauthenticated`->401, `forbidden`->403, `bad_input`->400, `not_found`->404,
// `conflict`->409, `temporarily_unavailable`->503, everything else->500.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use airwave_core::Error;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Thin wrapper over the internal error taxonomy so handlers can `?` an
/// `airwave_core::Result` directly and still construct ad-hoc errors for
/// request-shape problems the domain layer never sees.
#[derive(Debug)]
pub struct AppError(pub Error);

impl AppError {
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self(Error::Unauthenticated(message.into()))
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(Error::Forbidden(message.into()))
    }

    #[must_use]
    pub fn bad_input(message: impl Into<String>) -> Self {
        Self(Error::BadInput(message.into()))
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self(Error::NotFound(message.into()))
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self(Error::Internal(message.into()))
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self(err.into())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for AppError {}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    kind: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            Error::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Error::BadInput(_) => (StatusCode::BAD_REQUEST, "bad_input"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Error::TemporarilyUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable"),
            Error::Internal(_) => {
                tracing::error!(error = %self.0, "internal error surfaced to client as 500");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let message = self.0.to_string();
        (status, Json(ErrorBody { error: &message, kind })).into_response()
    }
}
