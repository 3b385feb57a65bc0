//! Typed publish/subscribe wrapper over the State Store's pub/sub channels.
//! One channel per [`EventType`]; `timestamp` is assigned here, at publish
//! time, never by the caller.

use chrono::Utc;

use airwave_core::models::{EventData, EventEnvelope, EventType};
use airwave_core::{Result, StateStore};

fn channel_name(event_type: EventType) -> String {
    format!("airwave:events:{event_type}")
}

#[derive(Clone)]
pub struct EventBus {
    state_store: StateStore,
}

impl EventBus {
    #[must_use]
    pub const fn new(state_store: StateStore) -> Self {
        Self { state_store }
    }

    /// Publishes `data` on its event type's channel. Fire-and-forget: a
    /// publish failure is returned to the caller but never blocks on a slow
    /// or absent subscriber.
    pub async fn publish(&self, data: EventData) -> Result<EventEnvelope> {
        let envelope = EventEnvelope::new(data, Utc::now());
        let payload = serde_json::to_string(&envelope)?;
        self.state_store
            .publish(&channel_name(envelope.event_type()), &payload)
            .await?;
        Ok(envelope)
    }

    /// Subscribes to a single event type's channel.
    pub async fn subscribe(&self, event_type: EventType) -> Result<EventSubscription> {
        let subscription = self.state_store.subscribe(&channel_name(event_type)).await?;
        Ok(EventSubscription { subscription })
    }

    /// Subscribes to every event type — the Webhook Dispatcher's startup
    /// mode, since a single subscription registration spans all four
    /// channels it might need to match against.
    pub async fn subscribe_all(&self) -> Result<Vec<EventSubscription>> {
        let mut subscriptions = Vec::with_capacity(4);
        for event_type in [
            EventType::SongChanged,
            EventType::LivestreamStarted,
            EventType::LivestreamEnded,
            EventType::QueueSwitched,
        ] {
            subscriptions.push(self.subscribe(event_type).await?);
        }
        Ok(subscriptions)
    }
}

pub struct EventSubscription {
    subscription: airwave_core::state_store::Subscription,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Result<Option<EventEnvelope>> {
        match self.subscription.recv().await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}
