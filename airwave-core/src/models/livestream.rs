use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, SessionId};

/// The single global slot granting permission to hold a live session.
/// Reservation is an atomic compare-and-set in the State Store; at most one
/// instance of this object is ever `occupied` system-wide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivestreamSlot {
    pub occupied: bool,
    pub holder_principal_id: Option<PrincipalId>,
    pub session_id: Option<SessionId>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl LivestreamSlot {
    #[must_use]
    pub fn reserved(holder_principal_id: PrincipalId, session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            occupied: true,
            holder_principal_id: Some(holder_principal_id),
            session_id: Some(session_id),
            connected_at: Some(now),
        }
    }

    #[must_use]
    pub fn vacant() -> Self {
        Self::default()
    }
}

/// Why a disconnect callback fired, carried through to `livestream_ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Client,
    Limit,
    Admin,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Client => "client",
            Self::Limit => "limit",
            Self::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

/// Per-principal cumulative broadcast time, retained 30 days after last
/// update so reconnects within a billing-like window keep accumulating.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LivestreamTimeLedger {
    pub accumulated_seconds: u64,
    pub first_use_at: Option<DateTime<Utc>>,
}

impl LivestreamTimeLedger {
    #[must_use]
    pub fn remaining_seconds(&self, max_streaming_seconds: u64, elapsed_this_session: u64) -> i64 {
        max_streaming_seconds as i64 - (self.accumulated_seconds + elapsed_this_session) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_slot_is_not_occupied() {
        let slot = LivestreamSlot::vacant();
        assert!(!slot.occupied);
        assert!(slot.holder_principal_id.is_none());
    }

    #[test]
    fn remaining_seconds_goes_negative_past_the_limit() {
        let ledger = LivestreamTimeLedger {
            accumulated_seconds: 50,
            first_use_at: Some(Utc::now()),
        };
        assert_eq!(ledger.remaining_seconds(60, 5), 5);
        assert_eq!(ledger.remaining_seconds(60, 15), -5);
    }
}
