use thiserror::Error;

/// The internal error taxonomy shared by the State Store, Catalog Store, and
/// every domain service. HTTP mapping happens once, at the API boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("temporarily unavailable: {0}")]
    TemporarilyUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn quota_exhausted() -> Self {
        Self::Forbidden("quota_exhausted".to_string())
    }

    #[must_use]
    pub fn queue_full() -> Self {
        Self::Forbidden("queue_full".to_string())
    }

    #[must_use]
    pub fn duplicate() -> Self {
        Self::Forbidden("duplicate".to_string())
    }

    #[must_use]
    pub fn too_long() -> Self {
        Self::BadInput("too_long".to_string())
    }
}

/// Classifies driver-level Postgres failures: row-not-found becomes
/// `NotFound`, unique-violation becomes `Conflict`, connection/pool
/// exhaustion becomes `TemporarilyUnavailable`.
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                Self::TemporarilyUnavailable(format!("catalog store unavailable: {err}"))
            }
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => Self::Conflict(db_err.message().to_string()),
                Some("23503") => Self::NotFound("referenced resource not found".to_string()),
                Some("23514" | "23502") => Self::BadInput(db_err.message().to_string()),
                _ => Self::Internal(format!("database error: {err}")),
            },
            _ => Self::Internal(format!("database error: {err}")),
        }
    }
}

/// Classifies driver-level Redis failures. Connection-level errors are
/// transient; everything else is internal.
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::TemporarilyUnavailable(format!("state store unavailable: {err}"))
        } else {
            Self::Internal(format!("redis error: {err}"))
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthenticated(format!("invalid token: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
