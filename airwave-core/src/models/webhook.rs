use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::WebhookId;
use crate::models::event::EventType;

/// A registered webhook. Subscription is idempotent on `(url, events)`:
/// re-registering the same pair updates `signing_key`/`description` while
/// preserving `webhook_id` and `created_at`. `signing_key` is never
/// serialized back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub webhook_id: WebhookId,
    pub url: String,
    pub events: Vec<EventType>,
    #[serde(skip_serializing)]
    pub signing_key: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    #[must_use]
    pub fn matches(&self, event_type: EventType) -> bool {
        self.events.contains(&event_type)
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

/// One entry in a subscription's bounded delivery log. Retention is 7 days
/// or the last 100 entries, whichever is tighter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub url: String,
    pub status: DeliveryStatus,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Retention policy applied when a dispatcher appends a delivery record.
pub const DELIVERY_RETENTION_MAX_ENTRIES: usize = 100;
pub const DELIVERY_RETENTION_DAYS: i64 = 7;

/// Prunes `deliveries` (assumed newest-first) to the retention policy.
pub fn prune_deliveries(deliveries: &mut Vec<WebhookDelivery>, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::days(DELIVERY_RETENTION_DAYS);
    deliveries.retain(|d| d.timestamp >= cutoff);
    deliveries.truncate(DELIVERY_RETENTION_MAX_ENTRIES);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(timestamp: DateTime<Utc>) -> WebhookDelivery {
        WebhookDelivery {
            timestamp,
            event_type: EventType::SongChanged,
            url: "https://example.com/hook".to_string(),
            status: DeliveryStatus::Success,
            status_code: Some(200),
            error: None,
            latency_ms: 12,
        }
    }

    #[test]
    fn prune_drops_entries_older_than_seven_days() {
        let now = Utc::now();
        let mut deliveries = vec![delivery(now), delivery(now - chrono::Duration::days(8))];
        prune_deliveries(&mut deliveries, now);
        assert_eq!(deliveries.len(), 1);
    }

    #[test]
    fn prune_caps_at_one_hundred_entries() {
        let now = Utc::now();
        let mut deliveries: Vec<_> = (0..150).map(|_| delivery(now)).collect();
        prune_deliveries(&mut deliveries, now);
        assert_eq!(deliveries.len(), DELIVERY_RETENTION_MAX_ENTRIES);
    }

    #[test]
    fn signing_key_is_not_serialized() {
        let sub = WebhookSubscription {
            webhook_id: WebhookId::new(),
            url: "https://example.com".to_string(),
            events: vec![EventType::SongChanged],
            signing_key: "supersecret".to_string(),
            description: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&sub).unwrap();
        assert!(!json.contains("supersecret"));
    }
}
