//! Recording Worker: captures every accepted live session to an Ogg/Vorbis
//! file, discards captures shorter than the principal's
//! `min_recording_duration`, trims leading/trailing silence from the rest,
//! and indexes the result in the Catalog Store.
//!
//! Capture itself is a readable byte stream the mixer exposes (§1 Non-goals:
//! "the audio mixer ... treated as a black box addressable through ... a
//! readable capture of the final output") — this module only copies those
//! bytes to disk, the same "transport, not transcoding" boundary
//! [`crate::downloader`] draws around the media-fetch utility. Silence
//! trimming is itself DSP (also out of scope to implement in-process) and is
//! delegated to an external command using the identical one-JSON-line
//! contract [`crate::downloader::ProcessMediaDownloader`] uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::{timeout, Duration};

use airwave_core::config::RecordingsConfig;
use airwave_core::ids::{RecordingId, SessionId};
use airwave_core::models::{EventData, EventType};
use airwave_core::{Catalog, Error, Result};

use crate::arbiter::LivestreamArbiter;
use crate::event_bus::EventBus;

const CAPTURE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TRIM_TIMEOUT: Duration = Duration::from_secs(60);

/// Last-seen embedded tags for a session, polled from the Arbiter's
/// metadata state while the capture is active (the Arbiter clears that
/// state at `disconnect`, before this worker's event handler would get a
/// chance to read it, so the worker keeps its own running copy).
#[derive(Debug, Clone, Default)]
struct TagAccumulator {
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    description: Option<String>,
}

impl TagAccumulator {
    fn merge(&mut self, tags: &crate::arbiter::LivestreamMetadataTags) {
        if tags.title.is_some() {
            self.title = tags.title.clone();
        }
        if tags.artist.is_some() {
            self.artist = tags.artist.clone();
        }
        if tags.genre.is_some() {
            self.genre = tags.genre.clone();
        }
        if tags.description.is_some() {
            self.description = tags.description.clone();
        }
    }
}

struct ActiveCapture {
    stop: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
    tmp_path: PathBuf,
    show_id: Option<airwave_core::ids::ShowId>,
    min_recording_duration: u64,
    tags: Arc<Mutex<TagAccumulator>>,
    tag_poll: tokio::task::JoinHandle<()>,
}

pub struct RecordingWorker {
    catalog: Catalog,
    event_bus: EventBus,
    arbiter: Arc<LivestreamArbiter>,
    config: RecordingsConfig,
    sessions: Mutex<HashMap<SessionId, ActiveCapture>>,
}

impl RecordingWorker {
    #[must_use]
    pub fn new(
        catalog: Catalog,
        event_bus: EventBus,
        arbiter: Arc<LivestreamArbiter>,
        config: RecordingsConfig,
    ) -> Self {
        Self {
            catalog,
            event_bus,
            arbiter,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn tmp_dir(&self) -> PathBuf {
        self.config.dir.join("tmp")
    }

    /// Deletes any capture left behind by a crash between stopping a capture
    /// and persisting its row — the spec's explicit tolerance for an
    /// orphaned temporary file, reaped rather than adopted.
    pub async fn reap_orphaned_captures(&self) -> Result<()> {
        let dir = self.tmp_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Internal(format!("failed to create recordings tmp dir: {e}")))?;

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Internal(format!("failed to read recordings tmp dir: {e}")))?;

        let mut reaped = 0u32;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("failed to iterate recordings tmp dir: {e}")))?
        {
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::info!(count = reaped, "reaped orphaned recording capture files on startup");
        }
        Ok(())
    }

    /// Subscribes to `livestream_started`/`livestream_ended` and drives the
    /// capture lifecycle until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut started = match self.event_bus.subscribe(EventType::LivestreamStarted).await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::error!(error = %e, "recording worker failed to subscribe to livestream_started");
                    return;
                }
            };
            let mut ended = match self.event_bus.subscribe(EventType::LivestreamEnded).await {
                Ok(sub) => sub,
                Err(e) => {
                    tracing::error!(error = %e, "recording worker failed to subscribe to livestream_ended");
                    return;
                }
            };

            loop {
                tokio::select! {
                    envelope = started.recv() => {
                        match envelope {
                            Ok(Some(envelope)) => {
                                if let EventData::LivestreamStarted { principal_id: _, session_id } = envelope.data {
                                    if let Err(e) = self.on_started(session_id).await {
                                        tracing::error!(error = %e, "failed to start recording capture");
                                    }
                                }
                            }
                            Ok(None) => {
                                tracing::warn!("livestream_started subscription closed");
                                return;
                            }
                            Err(e) => tracing::error!(error = %e, "error receiving livestream_started"),
                        }
                    }
                    envelope = ended.recv() => {
                        match envelope {
                            Ok(Some(envelope)) => {
                                if let EventData::LivestreamEnded { session_id, duration_seconds, .. } = envelope.data {
                                    if let Err(e) = self.on_ended(session_id, duration_seconds).await {
                                        tracing::error!(error = %e, "failed to finalize recording capture");
                                    }
                                }
                            }
                            Ok(None) => {
                                tracing::warn!("livestream_ended subscription closed");
                                return;
                            }
                            Err(e) => tracing::error!(error = %e, "error receiving livestream_ended"),
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("recording worker shutting down");
                        return;
                    }
                }
            }
        })
    }

    async fn on_started(&self, session_id: SessionId) -> Result<()> {
        // Read here, not in `on_ended`: `disconnect` deletes this record
        // before `livestream_ended` is published, so it won't be there by
        // the time the matching `on_ended` runs.
        let info = self.arbiter.session_recording_info(&session_id).await?;
        let show_id = info.as_ref().and_then(|i| i.show_id.clone());
        let min_recording_duration = info.map_or(0, |i| i.min_recording_duration);

        tokio::fs::create_dir_all(self.tmp_dir())
            .await
            .map_err(|e| Error::Internal(format!("failed to create recordings tmp dir: {e}")))?;
        let tmp_path = self.tmp_dir().join(format!("{session_id}.ogg"));

        let (stop_tx, stop_rx) = oneshot::channel();
        let address = self.config.capture_address.clone();
        let capture_path = tmp_path.clone();
        let join = tokio::spawn(async move {
            if let Err(e) = capture_to_file(&address, &capture_path, stop_rx).await {
                tracing::warn!(error = %e, "recording capture ended with an error");
            }
        });

        let tags = Arc::new(Mutex::new(TagAccumulator::default()));
        let poll_tags = tags.clone();
        let arbiter = Arc::clone(&self.arbiter);
        let tag_poll = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(2));
            loop {
                ticker.tick().await;
                match arbiter.metadata().await {
                    Ok(latest) => poll_tags.lock().await.merge(&latest),
                    Err(e) => tracing::debug!(error = %e, "failed to poll livestream metadata for recording tags"),
                }
            }
        });

        self.sessions.lock().await.insert(
            session_id.clone(),
            ActiveCapture {
                stop: stop_tx,
                join,
                tmp_path,
                show_id,
                min_recording_duration,
                tags,
                tag_poll,
            },
        );
        tracing::info!(%session_id, "recording capture started");
        Ok(())
    }

    async fn on_ended(&self, session_id: SessionId, duration_seconds: u64) -> Result<()> {
        let Some(active) = self.sessions.lock().await.remove(&session_id) else {
            tracing::debug!(%session_id, "livestream_ended with no active capture, ignoring");
            return Ok(());
        };

        let _ = active.stop.send(());
        let _ = active.join.await;
        active.tag_poll.abort();

        if duration_seconds < active.min_recording_duration {
            let _ = tokio::fs::remove_file(&active.tmp_path).await;
            tracing::info!(%session_id, duration_seconds, min_recording_duration = active.min_recording_duration, "recording discarded, below retention threshold");
            return Ok(());
        }

        let trimmed_path = self.tmp_dir().join(format!("{session_id}.trimmed.ogg"));
        let trimmed_duration = match trim_silence(
            &self.config.trim_command,
            &active.tmp_path,
            &trimmed_path,
            self.config.silence_threshold_db,
            self.config.min_silence_seconds,
        )
        .await
        {
            Ok(duration) => duration,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "silence trim failed, archiving untrimmed capture");
                tokio::fs::copy(&active.tmp_path, &trimmed_path)
                    .await
                    .map_err(|e| Error::Internal(format!("failed to fall back to untrimmed capture: {e}")))?;
                duration_seconds as f64
            }
        };
        let _ = tokio::fs::remove_file(&active.tmp_path).await;

        let id = RecordingId::new();
        let final_path = self.config.dir.join(format!("{id}.ogg"));
        tokio::fs::rename(&trimmed_path, &final_path)
            .await
            .map_err(|e| Error::Internal(format!("failed to move trimmed capture into place: {e}")))?;

        let tags = active.tags.lock().await.clone();
        let recording = self
            .catalog
            .recordings
            .insert_with_id(
                id,
                airwave_core::catalog::NewRecording {
                    show_id: active.show_id,
                    session_id: session_id.clone(),
                    title: tags.title,
                    artist: tags.artist,
                    genre: tags.genre,
                    description: tags.description,
                    file_path: final_path.to_string_lossy().into_owned(),
                    duration_seconds: trimmed_duration,
                },
            )
            .await?;

        tracing::info!(%session_id, recording_id = %recording.id, duration_seconds = trimmed_duration, "recording archived");
        Ok(())
    }
}

/// Connects to the mixer's capture socket and copies bytes verbatim to
/// `dest_path` until `stop` fires or the connection closes.
async fn capture_to_file(address: &str, dest_path: &Path, mut stop: oneshot::Receiver<()>) -> Result<()> {
    let mut stream = timeout(CAPTURE_CONNECT_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| Error::TemporarilyUnavailable(format!("capture socket {address} timed out")))?
        .map_err(|e| Error::TemporarilyUnavailable(format!("capture socket {address} unreachable: {e}")))?;

    let mut file = tokio::fs::File::create(dest_path)
        .await
        .map_err(|e| Error::Internal(format!("failed to create capture file: {e}")))?;

    let mut buf = [0u8; 8192];
    loop {
        tokio::select! {
            _ = &mut stop => return Ok(()),
            read = stream.read(&mut buf) => {
                let n = read.map_err(|e| Error::Internal(format!("capture read failed: {e}")))?;
                if n == 0 {
                    return Ok(());
                }
                use tokio::io::AsyncWriteExt;
                file.write_all(&buf[..n])
                    .await
                    .map_err(|e| Error::Internal(format!("capture write failed: {e}")))?;
            }
        }
    }
}

#[derive(serde::Deserialize)]
struct TrimResult {
    duration_seconds: f64,
}

/// Invokes the configured silence-trim utility as
/// `<command> trim <input> <output> <threshold_db> <min_silence_seconds>`
/// and reads one JSON line of [`TrimResult`] from its stdout, mirroring
/// [`crate::downloader::ProcessMediaDownloader`]'s contract.
async fn trim_silence(
    command: &str,
    input: &Path,
    output: &Path,
    threshold_db: f32,
    min_silence_seconds: f64,
) -> Result<f64> {
    let run = Command::new(command)
        .arg("trim")
        .arg(input)
        .arg(output)
        .arg(threshold_db.to_string())
        .arg(min_silence_seconds.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output_result = timeout(TRIM_TIMEOUT, run)
        .await
        .map_err(|_| Error::TemporarilyUnavailable("silence trim timed out".to_string()))?
        .map_err(|e| Error::TemporarilyUnavailable(format!("failed to spawn silence trim: {e}")))?;

    if !output_result.status.success() {
        return Err(Error::Internal(format!(
            "silence trim failed: {}",
            String::from_utf8_lossy(&output_result.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output_result.stdout);
    let line = stdout
        .lines()
        .next_back()
        .ok_or_else(|| Error::Internal("silence trim produced no output".to_string()))?;

    let result: TrimResult = serde_json::from_str(line)
        .map_err(|e| Error::Internal(format!("silence trim produced invalid JSON: {e}")))?;
    Ok(result.duration_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_accumulator_keeps_last_seen_non_null_fields() {
        let mut acc = TagAccumulator::default();
        acc.merge(&crate::arbiter::LivestreamMetadataTags {
            title: Some("A".to_string()),
            artist: None,
            genre: None,
            description: None,
        });
        acc.merge(&crate::arbiter::LivestreamMetadataTags {
            title: None,
            artist: Some("B".to_string()),
            genre: None,
            description: None,
        });
        assert_eq!(acc.title.as_deref(), Some("A"));
        assert_eq!(acc.artist.as_deref(), Some("B"));
    }
}
