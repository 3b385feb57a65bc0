//! Livestream Arbiter: the single global slot granting permission to hold a
//! live broadcast session, the per-principal cumulative time ledger, and the
//! watchdog that force-disconnects a session once its quota is exhausted.
//!
//! The slot is a compare-and-set in the State Store (§ mirrors the admission
//! lock pattern in [`crate::queue`]): reservation is `SET NX`, release is a
//! compare-and-delete keyed on the exact value read, so a stale release can
//! never clobber a fresh reservation. Session limits are snapshotted into the
//! State Store at auth time — the only durable record of a livestream
//! principal's quota between callbacks, since principals themselves are
//! carried in the bearer token and never persisted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use airwave_core::ids::{PrincipalId, SessionId, ShowId};
use airwave_core::models::{DisconnectReason, EventData, LivestreamSlot, LivestreamTimeLedger, Principal};
use airwave_core::{Error, Result, StateStore};

use crate::event_bus::EventBus;
use crate::mixer::MixerControlChannel;

const SLOT_KEY: &str = "slot";
const SLOT_HOLDER_KEY: &str = "slot:holder";
const METADATA_KEY: &str = "livestream:metadata";
const WATCHDOG_LOCK_KEY: &str = "watchdog:livestream";
const LEDGER_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;
const FINALIZED_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Embedded-tag snapshot reported by the mixer's `/internal/livestream/metadata`
/// callback. Last-seen values win; consumed by the Source Observer (as
/// [`airwave_core::models::SongMetadata`], dropping `description`) and by the
/// Recording Worker (which keeps `description` too).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LivestreamMetadataTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
}

fn ledger_key(principal_id: &PrincipalId) -> String {
    format!("ledger:{principal_id}")
}

fn limits_key(session_id: &SessionId) -> String {
    format!("session:limits:{session_id}")
}

fn finalized_key(session_id: &SessionId) -> String {
    format!("session:finalized:{session_id}")
}

/// Snapshot of a livestream principal's quotas, taken at auth time so the
/// watchdog and anything downstream can enforce them without re-deriving the
/// bearer token.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SessionLimits {
    principal_id: PrincipalId,
    max_streaming_seconds: u64,
    min_recording_duration: u64,
    show_id: Option<ShowId>,
}

/// Outcome of an auth callback: either the slot was won, or it was already
/// occupied.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Accepted { session_id: SessionId },
    Rejected,
}

/// The subset of a session's admission-time limits the Recording Worker
/// needs, exposed read-only so it doesn't have to re-derive them from the
/// principal that authenticated the session.
#[derive(Debug, Clone)]
pub struct SessionRecordingInfo {
    pub min_recording_duration: u64,
    pub show_id: Option<ShowId>,
}

pub struct LivestreamArbiter {
    state_store: StateStore,
    event_bus: EventBus,
    mixer_control: Arc<dyn MixerControlChannel>,
    watchdog_interval: Duration,
    watchdog_lease_ttl_seconds: u64,
}

impl LivestreamArbiter {
    #[must_use]
    pub fn new(
        state_store: StateStore,
        event_bus: EventBus,
        mixer_control: Arc<dyn MixerControlChannel>,
        watchdog_interval: Duration,
    ) -> Self {
        let watchdog_lease_ttl_seconds = watchdog_interval.as_secs().saturating_mul(3).max(5);
        Self {
            state_store,
            event_bus,
            mixer_control,
            watchdog_interval,
            watchdog_lease_ttl_seconds,
        }
    }

    pub async fn slot(&self) -> Result<LivestreamSlot> {
        Ok(self
            .state_store
            .get_json::<LivestreamSlot>(SLOT_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Records the latest embedded-tag snapshot pushed by the mixer. Only
    /// meaningful while the slot is occupied; callers don't need to check
    /// that themselves since a metadata push with no active session is
    /// harmless (it is cleared on the next `disconnect`).
    pub async fn set_metadata(&self, tags: LivestreamMetadataTags) -> Result<()> {
        self.state_store.set_json(METADATA_KEY, &tags, None).await
    }

    pub async fn metadata(&self) -> Result<LivestreamMetadataTags> {
        Ok(self
            .state_store
            .get_json::<LivestreamMetadataTags>(METADATA_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Reads back the limits snapshotted at `auth` time for `session_id`.
    /// Only valid between `auth` and `disconnect` — `disconnect` deletes the
    /// record as part of finalizing the session, so callers that need it
    /// after the session ends (the Recording Worker's `on_ended`) must read
    /// it at `on_started` and hold onto it themselves.
    pub async fn session_recording_info(&self, session_id: &SessionId) -> Result<Option<SessionRecordingInfo>> {
        Ok(self
            .state_store
            .get_json::<SessionLimits>(&limits_key(session_id))
            .await?
            .map(|limits| SessionRecordingInfo {
                min_recording_duration: limits.min_recording_duration,
                show_id: limits.show_id,
            }))
    }

    /// Tries to reserve the global slot for `principal`. Only one caller ever
    /// wins a given race; everyone else is rejected outright, matching the
    /// "single active broadcaster" invariant.
    pub async fn auth(&self, principal: &Principal, now: DateTime<Utc>) -> Result<AuthOutcome> {
        let max_streaming_seconds = principal
            .max_streaming_seconds
            .ok_or_else(|| Error::BadInput("livestream principal missing max_streaming_seconds".to_string()))?;
        let min_recording_duration = principal.min_recording_duration.unwrap_or(0);

        let session_id = SessionId::new();
        let slot = LivestreamSlot::reserved(principal.id.clone(), session_id.clone(), now);
        let payload = serde_json::to_string(&slot)?;

        let won = self.state_store.set_if_absent(SLOT_KEY, &payload, None).await?;
        if !won {
            return Ok(AuthOutcome::Rejected);
        }

        self.state_store.set(SLOT_HOLDER_KEY, principal.id.as_str(), None).await?;

        let limits = SessionLimits {
            principal_id: principal.id.clone(),
            max_streaming_seconds,
            min_recording_duration,
            show_id: principal.show_id.clone(),
        };
        self.state_store
            .set_json(
                &limits_key(&session_id),
                &limits,
                Some(max_streaming_seconds.saturating_mul(2).max(3600)),
            )
            .await?;

        Ok(AuthOutcome::Accepted { session_id })
    }

    /// Confirms a session the mixer has started streaming. Tolerates arriving
    /// out of order with respect to `auth` (e.g. the mixer connects before
    /// the slot record is fully visible) by treating a mismatch as a no-op
    /// rather than an error — the slot, not this callback, is authoritative.
    pub async fn connect(&self, session_id: &SessionId) -> Result<()> {
        let slot = self.slot().await?;
        if slot.session_id.as_ref() != Some(session_id) {
            tracing::warn!(%session_id, "connect callback for a session that doesn't hold the slot");
            return Ok(());
        }
        let Some(principal_id) = slot.holder_principal_id.clone() else {
            return Ok(());
        };
        self.event_bus
            .publish(EventData::LivestreamStarted {
                principal_id,
                session_id: session_id.clone(),
            })
            .await?;
        Ok(())
    }

    /// Releases the slot and records elapsed time for `session_id`. Exactly
    /// one finalization happens per session regardless of how many times
    /// (or in what order relative to the watchdog) this is invoked — guarded
    /// by a short-lived marker rather than relying on the caller to dedupe.
    pub async fn disconnect(
        &self,
        session_id: &SessionId,
        reason: DisconnectReason,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let first = self
            .state_store
            .set_if_absent(&finalized_key(session_id), "1", Some(FINALIZED_TTL_SECONDS))
            .await?;
        if !first {
            tracing::debug!(%session_id, "disconnect already finalized, ignoring");
            return Ok(());
        }

        let slot = self.slot().await?;
        let released = if slot.session_id.as_ref() == Some(session_id) {
            let raw = serde_json::to_string(&slot)?;
            self.state_store.compare_and_delete(SLOT_KEY, &raw).await?;
            self.state_store.del(SLOT_HOLDER_KEY).await?;
            self.state_store.del(METADATA_KEY).await?;
            Some(slot)
        } else {
            None
        };

        let Some(slot) = released else {
            self.state_store.del(&limits_key(session_id)).await?;
            tracing::warn!(%session_id, "disconnect for a session not currently holding the slot");
            return Ok(());
        };

        let principal_id = slot
            .holder_principal_id
            .ok_or_else(|| Error::Internal("occupied slot missing holder_principal_id".to_string()))?;
        let connected_at = slot.connected_at.unwrap_or(now);
        let elapsed = (now - connected_at).num_seconds().max(0) as u64;

        let key = ledger_key(&principal_id);
        let mut ledger: LivestreamTimeLedger = self.state_store.get_json(&key).await?.unwrap_or_default();
        if ledger.first_use_at.is_none() {
            ledger.first_use_at = Some(now);
        }
        ledger.accumulated_seconds = ledger.accumulated_seconds.saturating_add(elapsed);
        self.state_store.set_json(&key, &ledger, Some(LEDGER_TTL_SECONDS)).await?;

        self.state_store.del(&limits_key(session_id)).await?;

        self.event_bus
            .publish(EventData::LivestreamEnded {
                principal_id,
                session_id: session_id.clone(),
                duration_seconds: elapsed,
                reason,
            })
            .await?;

        Ok(())
    }

    /// Spawns the time-limit watchdog as a background task, guarded by a
    /// single-runner lease so only one replica enforces limits at a time.
    /// Loss of the lease mid-run suspends enforcement on this replica until
    /// it is re-acquired on a later tick — never treated as fatal.
    pub fn spawn_watchdog(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.watchdog_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            let mut lease: Option<airwave_core::state_store::lock::LockGuard> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        tracing::info!("livestream watchdog shutting down");
                        return;
                    }
                }

                lease = match lease {
                    None => {
                        match airwave_core::state_store::lock::LockGuard::new(
                            self.state_store.lock(),
                            WATCHDOG_LOCK_KEY.to_string(),
                            self.watchdog_lease_ttl_seconds,
                        )
                        .await
                        {
                            Ok(guard) => {
                                tracing::info!("livestream watchdog lease acquired");
                                Some(guard)
                            }
                            Err(_) => None,
                        }
                    }
                    Some(guard) => {
                        match guard.extend(self.watchdog_lease_ttl_seconds).await {
                            Ok(true) => Some(guard),
                            _ => {
                                tracing::warn!("livestream watchdog lease lost, suspending enforcement");
                                None
                            }
                        }
                    }
                };

                if lease.is_none() {
                    continue;
                }

                if let Err(e) = self.check_time_limit(Utc::now()).await {
                    tracing::error!(error = %e, "livestream watchdog tick failed");
                }
            }
        })
    }

    async fn check_time_limit(&self, now: DateTime<Utc>) -> Result<()> {
        let slot = self.slot().await?;
        let Some(session_id) = slot.session_id.clone() else {
            return Ok(());
        };
        let Some(limits) = self.state_store.get_json::<SessionLimits>(&limits_key(&session_id)).await? else {
            return Ok(());
        };
        let connected_at = slot.connected_at.unwrap_or(now);
        let elapsed_this_session = (now - connected_at).num_seconds().max(0) as u64;

        let ledger: LivestreamTimeLedger = self
            .state_store
            .get_json(&ledger_key(&limits.principal_id))
            .await?
            .unwrap_or_default();

        if ledger.remaining_seconds(limits.max_streaming_seconds, elapsed_this_session) > 0 {
            return Ok(());
        }

        tracing::info!(%session_id, principal_id = %limits.principal_id, "streaming time limit reached, forcing disconnect");

        if let Err(e) = self.mixer_control.force_disconnect(session_id.as_str()).await {
            tracing::warn!(%session_id, error = %e, "failed to issue forced disconnect command to mixer");
        }

        self.disconnect(&session_id, DisconnectReason::Limit, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_outcome_carries_session_id() {
        let session_id = SessionId::new();
        let outcome = AuthOutcome::Accepted {
            session_id: session_id.clone(),
        };
        match outcome {
            AuthOutcome::Accepted { session_id: got } => assert_eq!(got, session_id),
            AuthOutcome::Rejected => panic!("expected Accepted"),
        }
    }
}
