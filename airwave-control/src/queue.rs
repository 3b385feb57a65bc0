//! Queue Controller: admits media into the user or fallback queue, enforces
//! per-principal quotas and duplicate suppression, and proxies control
//! operations (list/clear/play/pause/resume) onto the mixer's queue
//! sockets.
//!
//! Song bookkeeping lives entirely in the State Store — an order list of
//! song IDs per queue plus one JSON blob per song — since it is
//! cross-process coordination state, not a durable record (§5 of the
//! accompanying design notes).

use std::sync::Arc;
use std::time::Duration;

use airwave_core::fingerprint::{fingerprint_bytes, fingerprint_url};
use airwave_core::ids::{PrincipalId, SongId};
use airwave_core::models::{QueueKind, Song, UserQuotaState};
use airwave_core::{Error, Result, StateStore};

use crate::downloader::MediaDownloader;
use crate::mixer::QueueSocket;

fn order_key(queue: QueueKind) -> String {
    format!("queue:{queue}:order")
}

fn song_key(song_id: &SongId) -> String {
    format!("song:{song_id}")
}

fn quota_key(principal_id: &PrincipalId) -> String {
    format!("quota:user:{principal_id}")
}

/// Either a URL to download or raw uploaded bytes, mutually exclusive per
/// the admission contract.
pub enum MediaInput {
    Url(String),
    File { bytes: Vec<u8>, file_path: String },
}

pub struct AddSongRequest {
    pub principal_id: PrincipalId,
    pub max_queue_songs: u32,
    pub max_add_requests: u32,
    pub media: MediaInput,
    pub song_name: Option<String>,
    pub artist: Option<String>,
}

pub struct QueueController {
    state_store: StateStore,
    user_socket: Arc<dyn QueueSocket>,
    fallback_socket: Arc<dyn QueueSocket>,
    downloader: Arc<dyn MediaDownloader>,
    max_song_duration_seconds: u64,
    max_file_size_bytes: u64,
    dup_window: usize,
    download_timeout: Duration,
}

impl QueueController {
    #[must_use]
    pub fn new(
        state_store: StateStore,
        user_socket: Arc<dyn QueueSocket>,
        fallback_socket: Arc<dyn QueueSocket>,
        downloader: Arc<dyn MediaDownloader>,
        max_song_duration_seconds: u64,
        max_file_size_bytes: u64,
        dup_window: usize,
        download_timeout: Duration,
    ) -> Self {
        Self {
            state_store,
            user_socket,
            fallback_socket,
            downloader,
            max_song_duration_seconds,
            max_file_size_bytes,
            dup_window,
            download_timeout,
        }
    }

    fn socket_for(&self, queue: QueueKind) -> &Arc<dyn QueueSocket> {
        match queue {
            QueueKind::User => &self.user_socket,
            QueueKind::Fallback => &self.fallback_socket,
        }
    }

    /// Admits a song into the `user` queue, enforcing the full precondition
    /// chain in order. Any failure aborts before durable state changes; a
    /// download that completes before a later precondition fails has its
    /// file removed.
    pub async fn add_user_song(&self, request: AddSongRequest) -> Result<Song> {
        let quota_key = quota_key(&request.principal_id);

        let lock = self.state_store.lock();
        let lock_key = format!("admission:{}", request.principal_id);

        let principal_id = request.principal_id.clone();
        let max_queue_songs = request.max_queue_songs;
        let max_add_requests = request.max_add_requests;
        let song_name = request.song_name.clone();
        let artist = request.artist.clone();

        // Cheap precondition pass ahead of `resolve_media`: a quota-exhausted
        // caller must never pay for a download (up to `download_timeout`,
        // default 120s) only to have it deleted. This is a fast-fail, not the
        // authoritative check — the lock below re-reads and re-checks quota
        // after the download completes, since a concurrent admission could
        // exhaust the quota in between.
        let precheck: UserQuotaState = self.state_store.get_json(&quota_key).await?.unwrap_or_default();
        if precheck.lifetime_add_count >= max_add_requests {
            return Err(Error::quota_exhausted());
        }
        if precheck.queued_count >= max_queue_songs {
            return Err(Error::queue_full());
        }

        let (file_path, duration_seconds, fingerprint, title, genre, cleanup_on_failure) =
            self.resolve_media(request.media).await?;

        let title = song_name.or(title);

        let result = lock
            .with_lock(&lock_key, 10, || async {
                let quota: UserQuotaState =
                    self.state_store.get_json(&quota_key).await?.unwrap_or_default();

                if quota.lifetime_add_count >= max_add_requests {
                    return Err(Error::quota_exhausted());
                }
                if quota.queued_count >= max_queue_songs {
                    return Err(Error::queue_full());
                }
                if duration_seconds > self.max_song_duration_seconds {
                    return Err(Error::too_long());
                }
                if self.is_duplicate(QueueKind::User, &fingerprint).await? {
                    return Err(Error::duplicate());
                }

                let song = Song {
                    song_id: SongId::new(),
                    queue: QueueKind::User,
                    owner_principal_id: Some(principal_id.clone()),
                    file_path: file_path.clone(),
                    title: title.clone(),
                    artist: artist.clone(),
                    genre: genre.clone(),
                    duration_seconds,
                    fingerprint: fingerprint.clone(),
                };

                self.state_store
                    .set_json(&song_key(&song.song_id), &song, None)
                    .await?;
                self.state_store
                    .list_push_tail(&order_key(QueueKind::User), song.song_id.as_str())
                    .await?;

                let next_quota = UserQuotaState {
                    queued_count: quota.queued_count + 1,
                    lifetime_add_count: quota.lifetime_add_count + 1,
                };
                self.state_store.set_json(&quota_key, &next_quota, None).await?;

                self.user_socket.enqueue(&song.file_path).await?;

                Ok(song)
            })
            .await;

        match result {
            Ok(song) => Ok(song),
            Err(e) => {
                if cleanup_on_failure {
                    let _ = tokio::fs::remove_file(&file_path).await;
                }
                Err(e)
            }
        }
    }

    /// Admin/fallback admission: bypasses every precondition and quota
    /// update. `queue` selects which mixer socket receives the file.
    pub async fn add_admin_song(
        &self,
        queue: QueueKind,
        media: MediaInput,
        song_name: Option<String>,
        artist: Option<String>,
    ) -> Result<Song> {
        let (file_path, duration_seconds, fingerprint, title, genre, _) =
            self.resolve_media(media).await?;

        let song = Song {
            song_id: SongId::new(),
            queue,
            owner_principal_id: None,
            file_path: file_path.clone(),
            title: song_name.or(title),
            artist,
            genre,
            duration_seconds,
            fingerprint,
        };

        self.state_store
            .set_json(&song_key(&song.song_id), &song, None)
            .await?;
        self.state_store
            .list_push_tail(&order_key(queue), song.song_id.as_str())
            .await?;
        self.socket_for(queue).enqueue(&song.file_path).await?;

        Ok(song)
    }

    /// Resolves `media` into `(file_path, duration_seconds, fingerprint,
    /// title, genre, cleanup_on_failure)`. `cleanup_on_failure` is true only
    /// for a freshly downloaded file — an uploaded file's lifecycle is the
    /// caller's responsibility until admission succeeds.
    async fn resolve_media(
        &self,
        media: MediaInput,
    ) -> Result<(String, u64, String, Option<String>, Option<String>, bool)> {
        match media {
            MediaInput::Url(url) => {
                let fingerprint = fingerprint_url(&url)?;
                let downloaded = self.downloader.download(&url, self.download_timeout).await?;
                let file_path = downloaded.file_path.to_string_lossy().into_owned();
                Ok((
                    file_path,
                    downloaded.duration_seconds,
                    fingerprint,
                    downloaded.title,
                    downloaded.genre,
                    true,
                ))
            }
            MediaInput::File { bytes, file_path } => {
                if bytes.len() as u64 > self.max_file_size_bytes {
                    return Err(Error::too_long());
                }
                let fingerprint = fingerprint_bytes(&bytes);
                tokio::fs::write(&file_path, &bytes)
                    .await
                    .map_err(|e| Error::Internal(format!("failed to persist uploaded file: {e}")))?;
                // Duration for uploads is not independently measurable without
                // decoding, which is out of scope; callers that need it supply
                // `song_name`/`artist` and accept a zero duration sentinel.
                Ok((file_path, 0, fingerprint, None, None, true))
            }
        }
    }

    async fn is_duplicate(&self, queue: QueueKind, fingerprint: &str) -> Result<bool> {
        let window = self.dup_window as isize;
        if window == 0 {
            return Ok(false);
        }
        let ids = self
            .state_store
            .list_range(&order_key(queue), -window, -1)
            .await?;
        for id in ids {
            if let Some(song) = self
                .state_store
                .get_json::<Song>(&song_key(&SongId::from_string(id)))
                .await?
            {
                if song.fingerprint == fingerprint {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Removes a song from the `user` queue. `principal_id` must own it.
    pub async fn delete_user_song(&self, principal_id: &PrincipalId, song_id: &SongId) -> Result<()> {
        let song: Song = self
            .state_store
            .get_json(&song_key(song_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("song {song_id} not found")))?;

        if song.owner_principal_id.as_ref() != Some(principal_id) {
            return Err(Error::Forbidden("not the owner of this song".to_string()));
        }

        self.remove_song(QueueKind::User, song_id, &song).await?;

        if let Some(owner) = &song.owner_principal_id {
            let key = quota_key(owner);
            let mut quota: UserQuotaState = self.state_store.get_json(&key).await?.unwrap_or_default();
            quota.queued_count = quota.queued_count.saturating_sub(1);
            self.state_store.set_json(&key, &quota, None).await?;
        }

        Ok(())
    }

    /// Admin deletion from either queue: no ownership check, no quota
    /// adjustment for fallback (fallback songs are unowned).
    pub async fn admin_delete_song(&self, queue: QueueKind, song_id: &SongId) -> Result<()> {
        let song: Song = self
            .state_store
            .get_json(&song_key(song_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("song {song_id} not found")))?;
        self.remove_song(queue, song_id, &song).await
    }

    async fn remove_song(&self, queue: QueueKind, song_id: &SongId, song: &Song) -> Result<()> {
        self.state_store
            .list_remove(&order_key(queue), 1, song_id.as_str())
            .await?;
        self.state_store.del(&song_key(song_id)).await?;
        let _ = tokio::fs::remove_file(&song.file_path).await;
        Ok(())
    }

    /// Called by the Source Observer when it sees playback move away from
    /// `file_path` in the `user` queue — the mixer's own signal that the
    /// song finished. Not invoked for the fallback queue, which never
    /// cleans up after playback.
    pub async fn handle_song_finished(&self, file_path: &str) -> Result<()> {
        let ids = self.state_store.list_range(&order_key(QueueKind::User), 0, -1).await?;
        for id in ids {
            let key = song_key(&SongId::from_string(id.clone()));
            if let Some(song) = self.state_store.get_json::<Song>(&key).await? {
                if song.file_path == file_path {
                    self.delete_user_song_unchecked(&song).await?;
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn delete_user_song_unchecked(&self, song: &Song) -> Result<()> {
        self.remove_song(QueueKind::User, &song.song_id, song).await?;
        if let Some(owner) = &song.owner_principal_id {
            let key = quota_key(owner);
            let mut quota: UserQuotaState = self.state_store.get_json(&key).await?.unwrap_or_default();
            quota.queued_count = quota.queued_count.saturating_sub(1);
            self.state_store.set_json(&key, &quota, None).await?;
        }
        Ok(())
    }

    /// Lists a queue's songs, bounded by `limit` for public callers (`None`
    /// for admin, who sees the full queue).
    pub async fn list(&self, queue: QueueKind, limit: Option<usize>) -> Result<Vec<Song>> {
        let stop = match limit {
            Some(n) if n > 0 => n as isize - 1,
            _ => -1,
        };
        let ids = self.state_store.list_range(&order_key(queue), 0, stop).await?;
        let mut songs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(song) = self
                .state_store
                .get_json::<Song>(&song_key(&SongId::from_string(id)))
                .await?
            {
                songs.push(song);
            }
        }
        Ok(songs)
    }

    pub async fn clear(&self, queue: QueueKind) -> Result<()> {
        let ids = self.state_store.list_range(&order_key(queue), 0, -1).await?;
        for id in ids {
            let song_id = SongId::from_string(id);
            if let Some(song) = self.state_store.get_json::<Song>(&song_key(&song_id)).await? {
                let _ = tokio::fs::remove_file(&song.file_path).await;
            }
            self.state_store.del(&song_key(&song_id)).await?;
        }
        self.state_store.del(&order_key(queue)).await?;
        self.socket_for(queue).clear().await
    }

    pub async fn play(&self, queue: QueueKind) -> Result<()> {
        self.socket_for(queue).play().await
    }

    pub async fn pause(&self, queue: QueueKind) -> Result<()> {
        self.socket_for(queue).pause().await
    }

    pub async fn resume(&self, queue: QueueKind) -> Result<()> {
        self.socket_for(queue).resume().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::MockMediaDownloader;
    use crate::mixer::MockQueueSocket;

    async fn test_controller() -> QueueController {
        let state_store = StateStore::connect("redis://localhost:6379").await.unwrap();
        let mut user_socket = MockQueueSocket::new();
        user_socket.expect_enqueue().returning(|_| Ok(()));
        let mut fallback_socket = MockQueueSocket::new();
        fallback_socket.expect_enqueue().returning(|_| Ok(()));

        let mut downloader = MockMediaDownloader::new();
        downloader.expect_download().returning(|url, _| {
            Ok(crate::downloader::DownloadedMedia {
                file_path: std::path::PathBuf::from(format!("/tmp/{url}.ogg")),
                title: None,
                artist: None,
                genre: None,
                duration_seconds: 120,
            })
        });

        QueueController::new(
            state_store,
            Arc::new(user_socket),
            Arc::new(fallback_socket),
            Arc::new(downloader),
            1800,
            50 * 1024 * 1024,
            5,
            Duration::from_secs(120),
        )
    }

    fn request(principal_id: &PrincipalId, url: &str, max_queue_songs: u32, max_add_requests: u32) -> AddSongRequest {
        AddSongRequest {
            principal_id: principal_id.clone(),
            max_queue_songs,
            max_add_requests,
            media: MediaInput::Url(url.to_string()),
            song_name: None,
            artist: None,
        }
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn quota_exhaustion_rejects_after_lifetime_limit() {
        let controller = test_controller().await;
        let principal_id = PrincipalId::new();

        // max_queue_songs=2, max_add_requests=3 mirrors the scenario from the
        // accompanying design notes: three admissions succeed, the fourth is
        // rejected even after deleting one song drops queued_count back down.
        controller
            .add_user_song(request(&principal_id, "https://example.com/a", 2, 3))
            .await
            .unwrap();
        let b = controller
            .add_user_song(request(&principal_id, "https://example.com/b", 2, 3))
            .await
            .unwrap();

        let err = controller
            .add_user_song(request(&principal_id, "https://example.com/c", 2, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        controller.delete_user_song(&principal_id, &b.song_id).await.unwrap();

        // queued_count has room again but lifetime_add_count is exhausted.
        let err = controller
            .add_user_song(request(&principal_id, "https://example.com/d", 2, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn duplicate_within_window_is_rejected() {
        let controller = test_controller().await;
        let principal_id = PrincipalId::new();

        controller
            .add_user_song(request(&principal_id, "https://example.com/same", 10, 10))
            .await
            .unwrap();

        let err = controller
            .add_user_song(request(&principal_id, "https://example.com/same", 10, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn admin_admission_bypasses_quotas_and_is_unowned() {
        let controller = test_controller().await;

        let song = controller
            .add_admin_song(QueueKind::Fallback, MediaInput::Url("https://example.com/jingle".to_string()), None, None)
            .await
            .unwrap();

        assert!(song.owner_principal_id.is_none());
        assert_eq!(song.queue, QueueKind::Fallback);
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn delete_user_song_requires_ownership() {
        let controller = test_controller().await;
        let owner = PrincipalId::new();
        let stranger = PrincipalId::new();

        let song = controller
            .add_user_song(request(&owner, "https://example.com/owned", 5, 5))
            .await
            .unwrap();

        let err = controller.delete_user_song(&stranger, &song.song_id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        controller.delete_user_song(&owner, &song.song_id).await.unwrap();
    }
}
