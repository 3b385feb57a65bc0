//! The media download utility is an external collaborator (§1 Non-goals):
//! given a URL, it produces a local audio file plus whatever tags it could
//! read. This module only defines the boundary and a process-based default
//! implementation; it does no decoding or transcoding itself.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;

use airwave_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub file_path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration_seconds: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(&self, url: &str, deadline: Duration) -> Result<DownloadedMedia>;
}

#[derive(Deserialize)]
struct DownloadResult {
    file_path: PathBuf,
    title: Option<String>,
    artist: Option<String>,
    genre: Option<String>,
    duration_seconds: u64,
}

/// Invokes a configured external command as `<command> <url> <dest_dir>`
/// and reads one JSON line of [`DownloadResult`] from its stdout.
pub struct ProcessMediaDownloader {
    command: String,
    dest_dir: PathBuf,
}

impl ProcessMediaDownloader {
    #[must_use]
    pub fn new(command: String, dest_dir: PathBuf) -> Self {
        Self { command, dest_dir }
    }
}

#[async_trait]
impl MediaDownloader for ProcessMediaDownloader {
    async fn download(&self, url: &str, deadline: Duration) -> Result<DownloadedMedia> {
        let run = Command::new(&self.command)
            .arg(url)
            .arg(&self.dest_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = timeout(deadline, run)
            .await
            .map_err(|_| Error::TemporarilyUnavailable(format!("media download of {url} timed out")))?
            .map_err(|e| Error::TemporarilyUnavailable(format!("failed to spawn media downloader: {e}")))?;

        if !output.status.success() {
            return Err(Error::BadInput(format!(
                "media download failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next_back()
            .ok_or_else(|| Error::Internal("media downloader produced no output".to_string()))?;

        let result: DownloadResult = serde_json::from_str(line)
            .map_err(|e| Error::Internal(format!("media downloader produced invalid JSON: {e}")))?;

        Ok(DownloadedMedia {
            file_path: result.file_path,
            title: result.title,
            artist: result.artist,
            genre: result.genre,
            duration_seconds: result.duration_seconds,
        })
    }
}
