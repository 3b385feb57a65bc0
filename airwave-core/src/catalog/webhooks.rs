use sqlx::{PgPool, Row};

use crate::ids::WebhookId;
use crate::models::event::EventType;
use crate::models::webhook::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
use crate::{Error, Result};

#[derive(Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Registers a subscription. Idempotent on `(url, events)`: a repeat
    /// registration updates `signing_key`/`description` in place, preserving
    /// `webhook_id` and `created_at`.
    pub async fn subscribe(
        &self,
        url: &str,
        events: &[EventType],
        signing_key: &str,
        description: Option<&str>,
    ) -> Result<WebhookSubscription> {
        let webhook_id = WebhookId::new();
        let event_strings: Vec<String> = events.iter().map(ToString::to_string).collect();

        let row = sqlx::query(
            "INSERT INTO webhook_subscriptions (webhook_id, url, events, signing_key, description)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (url, events) WHERE deleted_at IS NULL
             DO UPDATE SET signing_key = EXCLUDED.signing_key, description = EXCLUDED.description
             RETURNING webhook_id, url, events, signing_key, description, created_at",
        )
        .bind(webhook_id.as_str())
        .bind(url)
        .bind(&event_strings)
        .bind(signing_key)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_subscription(&row)
    }

    pub async fn unsubscribe(&self, webhook_id: &WebhookId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE webhook_subscriptions SET deleted_at = now()
             WHERE webhook_id = $1 AND deleted_at IS NULL",
        )
        .bind(webhook_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_id(&self, webhook_id: &WebhookId) -> Result<Option<WebhookSubscription>> {
        let row = sqlx::query(
            "SELECT webhook_id, url, events, signing_key, description, created_at
             FROM webhook_subscriptions WHERE webhook_id = $1 AND deleted_at IS NULL",
        )
        .bind(webhook_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_subscription(&r)).transpose()
    }

    /// All non-deleted subscriptions. The Webhook Dispatcher loads this list
    /// once at startup, then watches the Event Bus directly.
    pub async fn list_all(&self) -> Result<Vec<WebhookSubscription>> {
        let rows = sqlx::query(
            "SELECT webhook_id, url, events, signing_key, description, created_at
             FROM webhook_subscriptions WHERE deleted_at IS NULL
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_subscription).collect()
    }

    pub async fn record_delivery(
        &self,
        webhook_id: &WebhookId,
        delivery: &WebhookDelivery,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_deliveries
                (webhook_id, timestamp, event_type, url, status, status_code, error, latency_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(webhook_id.as_str())
        .bind(delivery.timestamp)
        .bind(delivery.event_type.to_string())
        .bind(&delivery.url)
        .bind(match delivery.status {
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        })
        .bind(delivery.status_code.map(i16::from))
        .bind(&delivery.error)
        .bind(i64::try_from(delivery.latency_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Applies the retention policy (7 days or the last 100 entries,
    /// whichever is tighter) to `webhook_id`'s delivery log. Called by the
    /// dispatcher after every recorded delivery rather than on a schedule,
    /// so the log never grows past the policy even between dispatcher
    /// restarts.
    pub async fn prune_deliveries(&self, webhook_id: &WebhookId) -> Result<()> {
        sqlx::query(
            "DELETE FROM webhook_deliveries
             WHERE webhook_id = $1
               AND (
                 timestamp < now() - interval '7 days'
                 OR id NOT IN (
                   SELECT id FROM webhook_deliveries
                   WHERE webhook_id = $1
                   ORDER BY timestamp DESC
                   LIMIT 100
                 )
               )",
        )
        .bind(webhook_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deliveries for a subscription, newest first, already pruned to the
    /// retention policy by [`prune_deliveries`](super::super::models::webhook::prune_deliveries)
    /// at write time — this just bounds the read defensively.
    pub async fn deliveries_for(
        &self,
        webhook_id: &WebhookId,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>> {
        let rows = sqlx::query(
            "SELECT timestamp, event_type, url, status, status_code, error, latency_ms
             FROM webhook_deliveries WHERE webhook_id = $1
             ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(webhook_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_delivery).collect()
    }

    fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<WebhookSubscription> {
        let event_strings: Vec<String> = row.get("events");
        let events = event_strings
            .iter()
            .map(|s| parse_event_type(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(WebhookSubscription {
            webhook_id: WebhookId::from_string(row.get("webhook_id")),
            url: row.get("url"),
            events,
            signing_key: row.get("signing_key"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_delivery(row: &sqlx::postgres::PgRow) -> Result<WebhookDelivery> {
        let status: String = row.get("status");
        let event_type: String = row.get("event_type");
        let status_code: Option<i16> = row.get("status_code");
        let latency_ms: i64 = row.get("latency_ms");

        Ok(WebhookDelivery {
            timestamp: row.get("timestamp"),
            event_type: parse_event_type(&event_type)?,
            url: row.get("url"),
            status: match status.as_str() {
                "success" => DeliveryStatus::Success,
                _ => DeliveryStatus::Failed,
            },
            status_code: status_code.map(|c| c as u16),
            error: row.get("error"),
            latency_ms: u64::try_from(latency_ms).unwrap_or(0),
        })
    }
}

fn parse_event_type(s: &str) -> Result<EventType> {
    match s {
        "song_changed" => Ok(EventType::SongChanged),
        "livestream_started" => Ok(EventType::LivestreamStarted),
        "livestream_ended" => Ok(EventType::LivestreamEnded),
        "queue_switched" => Ok(EventType::QueueSwitched),
        other => Err(Error::Internal(format!("unknown stored event type: {other}"))),
    }
}
