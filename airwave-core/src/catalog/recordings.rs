use sqlx::PgPool;

use crate::ids::{RecordingId, SessionId, ShowId};
use crate::models::Recording;
use crate::Result;

#[derive(Clone)]
pub struct RecordingRepository {
    pool: PgPool,
}

/// A fresh recording pending insertion. Separate from [`Recording`] because
/// `id`/`created_at` are assigned here rather than by the caller.
pub struct NewRecording {
    pub show_id: Option<ShowId>,
    pub session_id: SessionId,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub file_path: String,
    pub duration_seconds: f64,
}

impl RecordingRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts with a caller-assigned ID. Used by the Recording Worker, which
    /// generates the ID first so the file it moves into place can be named
    /// `<id>.ogg` before the row referencing it exists.
    pub async fn insert_with_id(&self, id: RecordingId, recording: NewRecording) -> Result<Recording> {
        self.insert_with_executor(id, recording, &self.pool).await
    }

    async fn insert_with_executor<'e, E>(&self, id: RecordingId, recording: NewRecording, executor: E) -> Result<Recording>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query_as::<_, Recording>(
            "INSERT INTO recordings
                (id, show_id, session_id, title, artist, genre, description, file_path, duration_seconds)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, show_id, session_id, created_at, title, artist, genre, description,
                       file_path, duration_seconds",
        )
        .bind(id.as_str())
        .bind(recording.show_id.as_ref().map(ShowId::as_str))
        .bind(recording.session_id.as_str())
        .bind(&recording.title)
        .bind(&recording.artist)
        .bind(&recording.genre)
        .bind(&recording.description)
        .bind(&recording.file_path)
        .bind(recording.duration_seconds)
        .fetch_one(executor)
        .await
        .map_err(Into::into)
    }

    pub async fn delete(&self, id: &RecordingId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE recordings SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(&self, id: &RecordingId) -> Result<Option<Recording>> {
        sqlx::query_as::<_, Recording>(
            "SELECT id, show_id, session_id, created_at, title, artist, genre, description,
                    file_path, duration_seconds
             FROM recordings WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    /// Filters by show name, genre, date range, and a full-text `search`
    /// term matched with `websearch_to_tsquery` against the generated
    /// `search_vector` column. Results are grouped by show via `ORDER BY
    /// show_id, created_at DESC` — callers fold the flat list into groups.
    pub async fn list(&self, query: &crate::models::RecordingQuery) -> Result<(Vec<Recording>, i64)> {
        let offset = i64::from((query.page() - 1) * query.page_size());
        let limit = i64::from(query.page_size());

        let mut binds: Vec<Bind> = Vec::new();
        let mut where_clauses = vec!["r.deleted_at IS NULL".to_string()];

        if let Some(show_name) = &query.show_name {
            binds.push(Bind::Text(show_name.clone()));
            where_clauses.push(format!("s.show_name = ${}", binds.len()));
        }
        if let Some(genre) = &query.genre {
            binds.push(Bind::Text(genre.clone()));
            where_clauses.push(format!("r.genre = ${}", binds.len()));
        }
        if let Some(date_from) = &query.date_from {
            binds.push(Bind::Timestamp(*date_from));
            where_clauses.push(format!("r.created_at >= ${}", binds.len()));
        }
        if let Some(date_to) = &query.date_to {
            binds.push(Bind::Timestamp(*date_to));
            where_clauses.push(format!("r.created_at <= ${}", binds.len()));
        }
        if let Some(search) = &query.search {
            binds.push(Bind::Text(search.clone()));
            where_clauses.push(format!(
                "r.search_vector @@ websearch_to_tsquery('simple', ${})",
                binds.len()
            ));
        }

        let where_sql = where_clauses.join(" AND ");

        let count_sql = format!(
            "SELECT COUNT(*) FROM recordings r LEFT JOIN shows s ON s.show_id = r.show_id WHERE {where_sql}"
        );
        let mut count_query = sqlx::query_scalar(&count_sql);
        for bind in &binds {
            count_query = bind.apply_scalar(count_query);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?;

        let limit_idx = binds.len() + 1;
        let offset_idx = binds.len() + 2;
        let list_sql = format!(
            "SELECT r.id, r.show_id, r.session_id, r.created_at, r.title, r.artist, r.genre,
                    r.description, r.file_path, r.duration_seconds
             FROM recordings r
             LEFT JOIN shows s ON s.show_id = r.show_id
             WHERE {where_sql}
             ORDER BY r.show_id NULLS LAST, r.created_at DESC
             LIMIT ${limit_idx} OFFSET ${offset_idx}"
        );
        let mut list_query = sqlx::query_as::<_, Recording>(&list_sql);
        for bind in &binds {
            list_query = bind.apply_as(list_query);
        }
        let rows = list_query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        Ok((rows, total))
    }
}

enum Bind {
    Text(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
}

impl Bind {
    fn apply_scalar<'q>(
        &'q self,
        query: sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryScalar<'q, sqlx::Postgres, i64, sqlx::postgres::PgArguments> {
        match self {
            Self::Text(s) => query.bind(s),
            Self::Timestamp(t) => query.bind(t),
        }
    }

    fn apply_as<'q>(
        &'q self,
        query: sqlx::query::QueryAs<'q, sqlx::Postgres, Recording, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, Recording, sqlx::postgres::PgArguments> {
        match self {
            Self::Text(s) => query.bind(s),
            Self::Timestamp(t) => query.bind(t),
        }
    }
}
