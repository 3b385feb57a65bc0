use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, ShowId};

/// The four principal kinds the Control API authenticates. `admin` and
/// `internal` carry unrestricted authority over the Queue Controller,
/// Livestream Arbiter, and Webhook Dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Admin,
    User,
    Livestream,
    Internal,
}

/// An authenticated caller, resolved once at the Control API boundary and
/// threaded through to the domain services that need its quotas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub kind: PrincipalKind,
    pub max_queue_songs: Option<u32>,
    pub max_add_requests: Option<u32>,
    pub max_streaming_seconds: Option<u64>,
    pub min_recording_duration: Option<u64>,
    pub show_id: Option<ShowId>,
}

impl Principal {
    #[must_use]
    pub fn admin(id: PrincipalId) -> Self {
        Self {
            id,
            kind: PrincipalKind::Admin,
            max_queue_songs: None,
            max_add_requests: None,
            max_streaming_seconds: None,
            min_recording_duration: None,
            show_id: None,
        }
    }

    #[must_use]
    pub fn internal(id: PrincipalId) -> Self {
        Self {
            id,
            kind: PrincipalKind::Internal,
            max_queue_songs: None,
            max_add_requests: None,
            max_streaming_seconds: None,
            min_recording_duration: None,
            show_id: None,
        }
    }

    #[must_use]
    pub fn user(id: PrincipalId, max_queue_songs: u32, max_add_requests: u32) -> Self {
        Self {
            id,
            kind: PrincipalKind::User,
            max_queue_songs: Some(max_queue_songs),
            max_add_requests: Some(max_add_requests),
            max_streaming_seconds: None,
            min_recording_duration: None,
            show_id: None,
        }
    }

    #[must_use]
    pub fn livestream(
        id: PrincipalId,
        max_streaming_seconds: u64,
        min_recording_duration: u64,
        show_id: Option<ShowId>,
    ) -> Self {
        Self {
            id,
            kind: PrincipalKind::Livestream,
            max_queue_songs: None,
            max_add_requests: None,
            max_streaming_seconds: Some(max_streaming_seconds),
            min_recording_duration: Some(min_recording_duration),
            show_id,
        }
    }

    /// `admin` and `internal` principals bypass quota enforcement entirely.
    #[must_use]
    pub const fn is_unrestricted(&self) -> bool {
        matches!(self.kind, PrincipalKind::Admin | PrincipalKind::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_and_internal_are_unrestricted() {
        assert!(Principal::admin(PrincipalId::new()).is_unrestricted());
        assert!(Principal::internal(PrincipalId::new()).is_unrestricted());
    }

    #[test]
    fn user_and_livestream_are_restricted() {
        assert!(!Principal::user(PrincipalId::new(), 5, 10).is_unrestricted());
        assert!(!Principal::livestream(PrincipalId::new(), 3600, 30, None).is_unrestricted());
    }
}
