use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{PrincipalId, SessionId};
use crate::models::livestream::DisconnectReason;
use crate::models::song::QueueKind;

/// The active audio source as derived by the Source Observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Livestream,
    User,
    Fallback,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Livestream => "livestream",
            Self::User => "user",
            Self::Fallback => "fallback",
        };
        write!(f, "{s}")
    }
}

impl From<QueueKind> for Source {
    fn from(queue: QueueKind) -> Self {
        match queue {
            QueueKind::User => Self::User,
            QueueKind::Fallback => Self::Fallback,
        }
    }
}

/// Tags describing the currently audible song. Fields are `null` when the
/// source has no embedded tags (e.g. a live broadcast with no Vorbis
/// comments yet).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
}

/// The four event types a subscriber can register for. The variant name
/// (serialized `snake_case`) is also the `event_type` tag used both in
/// webhook subscriptions and in the envelope itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SongChanged,
    LivestreamStarted,
    LivestreamEnded,
    QueueSwitched,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SongChanged => "song_changed",
            Self::LivestreamStarted => "livestream_started",
            Self::LivestreamEnded => "livestream_ended",
            Self::QueueSwitched => "queue_switched",
        };
        write!(f, "{s}")
    }
}

/// The event payload, modeled as a discriminated union rather than a
/// free-form map so downstream consumers (and our own webhook dispatcher)
/// get compile-time exhaustiveness. `event_type`/`data` are the externally
/// tagged representation used in the outbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum EventData {
    SongChanged {
        source: Source,
        metadata: SongMetadata,
    },
    LivestreamStarted {
        principal_id: PrincipalId,
        session_id: SessionId,
    },
    LivestreamEnded {
        principal_id: PrincipalId,
        session_id: SessionId,
        duration_seconds: u64,
        reason: DisconnectReason,
    },
    QueueSwitched {
        from: Source,
        to: Source,
    },
}

impl EventData {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::SongChanged { .. } => EventType::SongChanged,
            Self::LivestreamStarted { .. } => EventType::LivestreamStarted,
            Self::LivestreamEnded { .. } => EventType::LivestreamEnded,
            Self::QueueSwitched { .. } => EventType::QueueSwitched,
        }
    }

    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::SongChanged { source, metadata } => format!(
                "now playing on {source}: {}",
                metadata.title.as_deref().unwrap_or("(untitled)")
            ),
            Self::LivestreamStarted { principal_id, .. } => {
                format!("livestream started by {principal_id}")
            }
            Self::LivestreamEnded {
                principal_id,
                duration_seconds,
                reason,
                ..
            } => format!(
                "livestream by {principal_id} ended after {duration_seconds}s ({reason})"
            ),
            Self::QueueSwitched { from, to } => format!("source switched from {from} to {to}"),
        }
    }
}

/// The wire envelope wrapping an event. `timestamp` is assigned at publish
/// time by the Event Bus, never by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(flatten)]
    pub data: EventData,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(data: EventData, now: DateTime<Utc>) -> Self {
        Self {
            description: data.description(),
            timestamp: now,
            data,
        }
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.data.event_type()
    }
}

/// Recursively sorts object keys at every nesting level. This is the
/// canonical form the Webhook Dispatcher signs and consumers must
/// recompute the signature over.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonical_json(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonical_json).collect())
        }
        other => other.clone(),
    }
}

/// Serializes `value` to its canonical JSON string: keys sorted
/// lexicographically at every level, no extraneous whitespace.
pub fn to_canonical_json_string<T: Serialize>(value: &T) -> crate::Result<String> {
    let raw = serde_json::to_value(value)?;
    let canonical = canonical_json(&raw);
    Ok(serde_json::to_string(&canonical)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let envelope = EventEnvelope::new(
            EventData::QueueSwitched {
                from: Source::Fallback,
                to: Source::User,
            },
            Utc::now(),
        );
        let serialized = to_canonical_json_string(&envelope).unwrap();
        let zeta_pos = serialized.find("\"timestamp\"").unwrap();
        let data_pos = serialized.find("\"data\"").unwrap();
        let description_pos = serialized.find("\"description\"").unwrap();
        let event_type_pos = serialized.find("\"event_type\"").unwrap();
        // Lexicographic order: data < description < event_type < timestamp
        assert!(data_pos < description_pos);
        assert!(description_pos < event_type_pos);
        assert!(event_type_pos < zeta_pos);
    }

    #[test]
    fn canonical_json_is_deterministic_regardless_of_input_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(
            serde_json::to_string(&canonical_json(&a)).unwrap(),
            serde_json::to_string(&canonical_json(&b)).unwrap()
        );
    }

    #[test]
    fn event_type_display_matches_tag() {
        assert_eq!(EventType::SongChanged.to_string(), "song_changed");
        assert_eq!(EventType::LivestreamStarted.to_string(), "livestream_started");
    }
}
