//! Source Observer: polls the mixer's two queue sockets and the Livestream
//! Arbiter's slot once a second, derives the active source and the currently
//! audible song, and emits `queue_switched`/`song_changed` on transitions.
//!
//! Runs as a single leased background task (§5: "one Source Observer
//! (leased)") — the same `with_lock`/extend pattern the watchdog in
//! [`crate::arbiter`] uses, since both are single-runner loops guarded by a
//! State Store lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use airwave_core::models::{EventData, Source, SongMetadata};
use airwave_core::Result;

use crate::arbiter::LivestreamArbiter;
use crate::event_bus::EventBus;
use crate::mixer::QueueSocket;
use crate::queue::QueueController;

const OBSERVER_LOCK_KEY: &str = "observer:source";

/// Identity of the currently audible item, used only to detect a
/// `song_changed` transition — never persisted or exposed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SongIdentity {
    Queued { file_path: String, position: Option<u64> },
    Livestream { title: Option<String>, artist: Option<String>, genre: Option<String> },
    None,
}

pub struct SourceObserver {
    state_store: airwave_core::StateStore,
    event_bus: EventBus,
    arbiter: Arc<LivestreamArbiter>,
    queue_controller: Arc<QueueController>,
    user_socket: Arc<dyn QueueSocket>,
    fallback_socket: Arc<dyn QueueSocket>,
    poll_interval: Duration,
    lease_ttl_seconds: u64,
}

impl SourceObserver {
    #[must_use]
    pub fn new(
        state_store: airwave_core::StateStore,
        event_bus: EventBus,
        arbiter: Arc<LivestreamArbiter>,
        queue_controller: Arc<QueueController>,
        user_socket: Arc<dyn QueueSocket>,
        fallback_socket: Arc<dyn QueueSocket>,
        poll_interval: Duration,
    ) -> Self {
        let lease_ttl_seconds = poll_interval.as_secs().saturating_mul(5).max(5);
        Self {
            state_store,
            event_bus,
            arbiter,
            queue_controller,
            user_socket,
            fallback_socket,
            poll_interval,
            lease_ttl_seconds,
        }
    }

    /// Spawns the poll loop, guarded by a single-runner lease. Losing the
    /// lease mid-run simply suspends polling on this replica until it is
    /// re-acquired — another replica is presumably running the loop instead.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.tick().await;
            let mut lease: Option<airwave_core::state_store::lock::LockGuard> = None;
            let mut last_source: Option<Source> = None;
            let mut last_identity = SongIdentity::None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {
                        tracing::info!("source observer shutting down");
                        return;
                    }
                }

                lease = match lease {
                    None => {
                        match airwave_core::state_store::lock::LockGuard::new(
                            self.state_store.lock(),
                            OBSERVER_LOCK_KEY.to_string(),
                            self.lease_ttl_seconds,
                        )
                        .await
                        {
                            Ok(guard) => {
                                tracing::info!("source observer lease acquired");
                                Some(guard)
                            }
                            Err(_) => None,
                        }
                    }
                    Some(guard) => match guard.extend(self.lease_ttl_seconds).await {
                        Ok(true) => Some(guard),
                        _ => {
                            tracing::warn!("source observer lease lost, suspending polling");
                            None
                        }
                    },
                };

                if lease.is_none() {
                    continue;
                }

                if let Err(e) = self.poll_once(&mut last_source, &mut last_identity).await {
                    tracing::error!(error = %e, "source observer poll failed");
                }
            }
        })
    }

    async fn poll_once(
        &self,
        last_source: &mut Option<Source>,
        last_identity: &mut SongIdentity,
    ) -> Result<()> {
        let occupied = self.arbiter.slot().await?.occupied;

        let (source, metadata, identity, finished_user_file) = if occupied {
            let tags = self.arbiter.metadata().await?;
            let metadata = SongMetadata {
                title: tags.title.clone(),
                artist: tags.artist.clone(),
                genre: tags.genre.clone(),
            };
            let identity = SongIdentity::Livestream {
                title: tags.title,
                artist: tags.artist,
                genre: tags.genre,
            };
            (Source::Livestream, metadata, identity, None)
        } else {
            let user_status = self.user_socket.status().await.unwrap_or_default();
            if user_status.playing {
                let identity = SongIdentity::Queued {
                    file_path: user_status.file_path.clone().unwrap_or_default(),
                    position: user_status.position,
                };
                (Source::User, user_status.metadata, identity, None)
            } else {
                let fallback_status = self.fallback_socket.status().await.unwrap_or_default();
                let identity = SongIdentity::Queued {
                    file_path: fallback_status.file_path.clone().unwrap_or_default(),
                    position: fallback_status.position,
                };
                // A user-queue file that just stopped playing (but is no
                // longer reported as the current song) has finished; the
                // Queue Controller tolerates a file that is already gone
                // (race with its own cleanup) rather than erroring.
                let finished = last_source
                    .filter(|s| *s == Source::User)
                    .and_then(|_| match last_identity {
                        SongIdentity::Queued { file_path, .. } if !file_path.is_empty() => {
                            Some(file_path.clone())
                        }
                        _ => None,
                    });
                (Source::Fallback, fallback_status.metadata, identity, finished)
            }
        };

        if let Some(file_path) = finished_user_file {
            if let Err(e) = self.queue_controller.handle_song_finished(&file_path).await {
                tracing::warn!(file_path = %file_path, error = %e, "failed to clean up finished user-queue song");
            }
        }

        if last_source.is_some_and(|s| s != source) {
            self.event_bus
                .publish(EventData::QueueSwitched {
                    from: last_source.expect("checked above"),
                    to: source,
                })
                .await?;
        }

        if *last_source != Some(source) || *last_identity != identity {
            self.event_bus
                .publish(EventData::SongChanged { source, metadata })
                .await?;
        }

        *last_source = Some(source);
        *last_identity = identity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_identity_queued_distinguishes_by_position() {
        let a = SongIdentity::Queued {
            file_path: "/tmp/a.ogg".to_string(),
            position: Some(1),
        };
        let b = SongIdentity::Queued {
            file_path: "/tmp/a.ogg".to_string(),
            position: Some(2),
        };
        assert_ne!(a, b);
    }
}
