use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Row};

use crate::ids::ShowId;
use crate::Result;

/// A named broadcast show that recordings and livestream tokens can be
/// associated with. `show_name` is unique among non-deleted rows.
#[derive(Debug, Clone)]
pub struct Show {
    pub show_id: ShowId,
    pub show_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ShowRepository {
    pool: PgPool,
}

impl ShowRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Looks up a show by name, creating it if absent. `show_name` collisions
    /// from concurrent callers are resolved by the unique index: the loser
    /// of the race simply re-reads the winner's row.
    pub async fn get_or_create_by_name(&self, show_name: &str) -> Result<Show> {
        if let Some(show) = self.get_by_name(show_name).await? {
            return Ok(show);
        }

        let show_id = ShowId::new();
        let row = sqlx::query(
            "INSERT INTO shows (show_id, show_name) VALUES ($1, $2)
             ON CONFLICT (show_name) WHERE deleted_at IS NULL DO UPDATE SET show_name = EXCLUDED.show_name
             RETURNING show_id, show_name, created_at",
        )
        .bind(show_id.as_str())
        .bind(show_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::row_to_show(&row))
    }

    pub async fn get_by_name(&self, show_name: &str) -> Result<Option<Show>> {
        let row = sqlx::query(
            "SELECT show_id, show_name, created_at FROM shows
             WHERE show_name = $1 AND deleted_at IS NULL",
        )
        .bind(show_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::row_to_show(&r)))
    }

    pub async fn get_by_id<'e, E: PgExecutor<'e>>(
        executor: E,
        show_id: &ShowId,
    ) -> Result<Option<Show>> {
        let row = sqlx::query(
            "SELECT show_id, show_name, created_at FROM shows
             WHERE show_id = $1 AND deleted_at IS NULL",
        )
        .bind(show_id.as_str())
        .fetch_optional(executor)
        .await?;

        Ok(row.map(|r| Self::row_to_show(&r)))
    }

    fn row_to_show(row: &sqlx::postgres::PgRow) -> Show {
        Show {
            show_id: ShowId::from_string(row.get("show_id")),
            show_name: row.get("show_name"),
            created_at: row.get("created_at"),
        }
    }
}
