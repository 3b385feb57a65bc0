//! Webhook Dispatcher: subscribes to every event channel, matches
//! registered subscriptions, signs and delivers HTTPS POSTs, and records
//! the outcome of each attempt.
//!
//! Scaling mirrors [`crate::observer::SourceObserver`] and
//! [`crate::arbiter`]'s lease-based story, but by a different mechanism:
//! rather than one replica holding a lease, every replica runs the loop and
//! [`DispatcherMode::Partitioned`] has each one filter to the subscriptions
//! whose `webhook_id` hashes into its partition. `DispatcherMode::Single`
//! is the degenerate case of one partition — every replica accepts every
//! subscription, which is only safe to run as a single instance.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::watch;

use airwave_core::config::{DispatcherMode, WebhookConfig};
use airwave_core::ids::WebhookId;
use airwave_core::models::event::{to_canonical_json_string, EventEnvelope};
use airwave_core::models::webhook::{DeliveryStatus, WebhookDelivery, WebhookSubscription};
use airwave_core::{Catalog, Error, Result};

use crate::event_bus::EventBus;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);
const SUBSCRIPTION_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookDispatcher {
    catalog: Catalog,
    event_bus: EventBus,
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookDispatcher {
    #[must_use]
    pub fn new(catalog: Catalog, event_bus: EventBus, config: WebhookConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            catalog,
            event_bus,
            http,
            config,
        }
    }

    fn owns(&self, webhook_id: &WebhookId) -> bool {
        partition_owns(self.config.mode, self.config.partition_count, self.config.partition_index, webhook_id)
    }

    async fn load_subscriptions(&self) -> Vec<WebhookSubscription> {
        match self.catalog.webhooks.list_all().await {
            Ok(all) => all.into_iter().filter(|s| self.owns(&s.webhook_id)).collect(),
            Err(e) => {
                tracing::error!(error = %e, "failed to load webhook subscriptions");
                Vec::new()
            }
        }
    }

    /// Spawns the dispatch loop across all four event channels until
    /// `shutdown` fires. Subscriptions are reloaded on a timer rather than
    /// re-queried per event, trading a bounded staleness window (new
    /// subscribers may miss events for up to the refresh interval) for not
    /// hitting Postgres on every delivery.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut subs = match self.event_bus.subscribe_all().await {
                Ok(subs) => subs,
                Err(e) => {
                    tracing::error!(error = %e, "webhook dispatcher failed to subscribe to event channels");
                    return;
                }
            };
            // `subscribe_all` returns one subscription per `EventType` in a
            // fixed, documented order.
            let mut queue_switched = subs.pop().expect("subscribe_all returns 4 subscriptions");
            let mut livestream_ended = subs.pop().expect("subscribe_all returns 4 subscriptions");
            let mut livestream_started = subs.pop().expect("subscribe_all returns 4 subscriptions");
            let mut song_changed = subs.pop().expect("subscribe_all returns 4 subscriptions");

            let mut subscriptions = self.load_subscriptions().await;
            let mut refresh = tokio::time::interval(SUBSCRIPTION_REFRESH_INTERVAL);
            refresh.tick().await;

            loop {
                tokio::select! {
                    envelope = song_changed.recv() => {
                        if !self.on_envelope(envelope, &subscriptions).await {
                            return;
                        }
                    }
                    envelope = livestream_started.recv() => {
                        if !self.on_envelope(envelope, &subscriptions).await {
                            return;
                        }
                    }
                    envelope = livestream_ended.recv() => {
                        if !self.on_envelope(envelope, &subscriptions).await {
                            return;
                        }
                    }
                    envelope = queue_switched.recv() => {
                        if !self.on_envelope(envelope, &subscriptions).await {
                            return;
                        }
                    }
                    _ = refresh.tick() => {
                        subscriptions = self.load_subscriptions().await;
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("webhook dispatcher shutting down");
                        return;
                    }
                }
            }
        })
    }

    /// Handles one received envelope. Returns `false` when the owning
    /// subscription closed, signaling the caller to stop the loop.
    async fn on_envelope(
        &self,
        envelope: Result<Option<EventEnvelope>>,
        subscriptions: &[WebhookSubscription],
    ) -> bool {
        match envelope {
            Ok(Some(envelope)) => {
                self.dispatch(&envelope, subscriptions).await;
                true
            }
            Ok(None) => {
                tracing::warn!("an event subscription closed, stopping webhook dispatcher");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "error receiving event for webhook dispatch");
                true
            }
        }
    }

    /// Matches `envelope` against `subscriptions` and delivers to each
    /// match concurrently (§4.F: "deliveries for distinct subscriptions
    /// proceed in parallel").
    async fn dispatch(&self, envelope: &EventEnvelope, subscriptions: &[WebhookSubscription]) {
        let matching: Vec<&WebhookSubscription> = subscriptions
            .iter()
            .filter(|s| s.matches(envelope.event_type()))
            .collect();
        if matching.is_empty() {
            return;
        }

        let body = match to_canonical_json_string(envelope) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize event envelope for webhook delivery");
                return;
            }
        };

        let deliveries = matching.into_iter().map(|sub| self.deliver_and_record(sub, &body));
        futures::future::join_all(deliveries).await;
    }

    async fn deliver_and_record(&self, sub: &WebhookSubscription, body: &str) {
        let delivery = self.deliver(&sub.url, &sub.signing_key, body).await;
        if let Err(e) = self.catalog.webhooks.record_delivery(&sub.webhook_id, &delivery).await {
            tracing::error!(webhook_id = %sub.webhook_id, error = %e, "failed to record webhook delivery");
        }
        if let Err(e) = self.catalog.webhooks.prune_deliveries(&sub.webhook_id).await {
            tracing::warn!(webhook_id = %sub.webhook_id, error = %e, "failed to prune webhook delivery log");
        }
        if delivery.status == DeliveryStatus::Failed {
            tracing::warn!(
                url = %sub.url,
                status_code = ?delivery.status_code,
                error = ?delivery.error,
                "webhook delivery failed"
            );
        }
    }

    /// Signs `body` and POSTs it to `url`. Never retries: consumers are
    /// expected to be idempotent, and a failed delivery is simply recorded.
    async fn deliver(&self, url: &str, signing_key: &str, body: &str) -> WebhookDelivery {
        let now = chrono::Utc::now();
        let parsed_body = serde_json::from_str::<serde_json::Value>(body).ok();
        let event_type = match parsed_body
            .as_ref()
            .and_then(|v| v.get("event_type").cloned())
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(event_type) => event_type,
            None => airwave_core::models::event::EventType::SongChanged,
        };
        // §6 specifies `X-Webhook-Timestamp` as the envelope's own publish
        // timestamp, not the time of this delivery attempt, so consumers
        // recomputing the signature see a header consistent with the body.
        let envelope_timestamp = parsed_body
            .as_ref()
            .and_then(|v| v.get("timestamp").cloned())
            .and_then(|v| serde_json::from_value::<chrono::DateTime<chrono::Utc>>(v).ok())
            .unwrap_or(now);

        let signature = match sign(signing_key, body) {
            Ok(sig) => sig,
            Err(e) => {
                return WebhookDelivery {
                    timestamp: now,
                    event_type,
                    url: url.to_string(),
                    status: DeliveryStatus::Failed,
                    status_code: None,
                    error: Some(format!("failed to compute signature: {e}")),
                    latency_ms: 0,
                };
            }
        };

        let started = Instant::now();
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", format!("sha256={signature}"))
            .header("X-Webhook-Timestamp", envelope_timestamp.to_rfc3339())
            .body(body.to_string())
            .send()
            .await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (status, status_code, error) = match response {
            Ok(resp) if resp.status().is_success() => (DeliveryStatus::Success, Some(resp.status().as_u16()), None),
            Ok(resp) => (DeliveryStatus::Failed, Some(resp.status().as_u16()), None),
            Err(e) => (DeliveryStatus::Failed, None, Some(e.to_string())),
        };

        WebhookDelivery {
            timestamp: now,
            event_type,
            url: url.to_string(),
            status,
            status_code,
            error,
            latency_ms,
        }
    }

    /// Synchronously delivers a `webhook_test` envelope to `webhook_id` and
    /// returns the outcome. Used by the admin test endpoint, not the
    /// channel loop; `webhook_test` is never a subscribable channel so it
    /// is built directly rather than through [`EventData`](airwave_core::models::EventData).
    pub async fn test_delivery(&self, webhook_id: &WebhookId) -> Result<WebhookDelivery> {
        let sub = self
            .catalog
            .webhooks
            .get_by_id(webhook_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("webhook {webhook_id} not found")))?;

        let envelope = serde_json::json!({
            "event_type": "webhook_test",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "description": "test delivery",
            "data": {},
        });
        let canonical = airwave_core::models::event::canonical_json(&envelope);
        let body = serde_json::to_string(&canonical)?;

        let delivery = self.deliver(&sub.url, &sub.signing_key, &body).await;
        self.catalog.webhooks.record_delivery(webhook_id, &delivery).await?;
        self.catalog.webhooks.prune_deliveries(webhook_id).await?;
        Ok(delivery)
    }
}

/// Whether a subscription belongs to this replica under `mode`. Pulled out
/// of [`WebhookDispatcher::owns`] so partitioning can be unit-tested
/// without a live `Catalog`/`EventBus`.
fn partition_owns(mode: DispatcherMode, partition_count: u32, partition_index: u32, webhook_id: &WebhookId) -> bool {
    match mode {
        DispatcherMode::Single => true,
        DispatcherMode::Partitioned => {
            let mut hasher = DefaultHasher::new();
            webhook_id.as_str().hash(&mut hasher);
            let partitions = u64::from(partition_count.max(1));
            hasher.finish() % partitions == u64::from(partition_index)
        }
    }
}

fn sign(signing_key: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(signing_key.as_bytes())
        .map_err(|e| Error::Internal(format!("invalid webhook signing key: {e}")))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_for_the_same_key_and_body() {
        let a = sign("secret", "{\"a\":1}").unwrap();
        let b = sign("secret", "{\"a\":1}").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_differs_when_the_body_changes() {
        let a = sign("secret", "{\"a\":1}").unwrap();
        let b = sign("secret", "{\"a\":2}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn single_mode_owns_every_webhook() {
        let webhook_id = WebhookId::new();
        assert!(partition_owns(DispatcherMode::Single, 1, 0, &webhook_id));
    }

    #[test]
    fn partitioned_mode_assigns_exactly_one_partition() {
        let webhook_id = WebhookId::new();
        let owners: Vec<u32> = (0..4)
            .filter(|&i| partition_owns(DispatcherMode::Partitioned, 4, i, &webhook_id))
            .collect();
        assert_eq!(owners.len(), 1);
    }
}
