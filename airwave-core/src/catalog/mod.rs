//! Catalog Store: transactional Postgres persistence for shows, recordings,
//! and webhook subscriptions/deliveries. Song queue state and the
//! livestream slot live in the State Store instead — they are cross-process
//! coordination state, not durable records.

pub mod recordings;
pub mod shows;
pub mod webhooks;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::CatalogStoreConfig;
use crate::Result;

pub use recordings::{NewRecording, RecordingRepository};
pub use shows::{Show, ShowRepository};
pub use webhooks::WebhookRepository;

/// Facade bundling the pool and the per-entity repositories. Cloning is
/// cheap: `PgPool` and the repositories are all `Arc`-backed internally.
#[derive(Clone)]
pub struct Catalog {
    pool: PgPool,
    pub shows: ShowRepository,
    pub recordings: RecordingRepository,
    pub webhooks: WebhookRepository,
}

impl Catalog {
    pub async fn connect(config: &CatalogStoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(crate::Error::from)?;

        Ok(Self::from_pool(pool))
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            shows: ShowRepository::new(pool.clone()),
            recordings: RecordingRepository::new(pool.clone()),
            webhooks: WebhookRepository::new(pool.clone()),
            pool,
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Readiness probe: a trivial round-trip, used by `GET /health/ready`.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
