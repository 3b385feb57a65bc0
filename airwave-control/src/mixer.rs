//! Transport abstraction over the external audio mixer: two queue-control
//! sockets (user/fallback) and one telnet-style command channel used to
//! force a live-session disconnect. The mixer itself is out of scope; this
//! module only speaks its wire protocol.
//!
//! Behind the trait so the Queue Controller, Source Observer, and Livestream
//! Arbiter can be exercised against a mock instead of a live socket.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use airwave_core::models::SongMetadata;
use airwave_core::{Error, Result};

/// Snapshot of a queue socket's current state, as reported by the mixer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStatus {
    pub playing: bool,
    pub file_path: Option<String>,
    pub position: Option<u64>,
    pub metadata: SongMetadata,
}

/// One of the mixer's two queue-playback control sockets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueSocket: Send + Sync {
    async fn status(&self) -> Result<QueueStatus>;
    async fn enqueue(&self, file_path: &str) -> Result<()>;
    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// The mixer's telnet-style control channel, used only to force a live
/// session off the air when the watchdog fires.
#[async_trait]
pub trait MixerControlChannel: Send + Sync {
    async fn force_disconnect(&self, session_id: &str) -> Result<()>;
}

const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Line-based TCP implementation of [`QueueSocket`]: one command per line,
/// one line back. Connects fresh per call rather than holding a persistent
/// socket, since the mixer's queue sockets are polled at most once a second.
pub struct TcpQueueSocket {
    address: String,
}

impl TcpQueueSocket {
    #[must_use]
    pub fn new(address: String) -> Self {
        Self { address }
    }

    async fn command(&self, line: &str) -> Result<String> {
        let stream = timeout(COMMAND_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::TemporarilyUnavailable(format!("mixer queue socket {} timed out", self.address)))?
            .map_err(|e| Error::TemporarilyUnavailable(format!("mixer queue socket {} unreachable: {e}", self.address)))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| Error::TemporarilyUnavailable(format!("mixer write failed: {e}")))?;

        let mut response = String::new();
        timeout(COMMAND_TIMEOUT, reader.read_line(&mut response))
            .await
            .map_err(|_| Error::TemporarilyUnavailable("mixer response timed out".to_string()))?
            .map_err(|e| Error::TemporarilyUnavailable(format!("mixer read failed: {e}")))?;

        Ok(response.trim().to_string())
    }
}

#[async_trait]
impl QueueSocket for TcpQueueSocket {
    async fn status(&self) -> Result<QueueStatus> {
        let line = self.command("STATUS").await?;
        Ok(parse_status_line(&line))
    }

    async fn enqueue(&self, file_path: &str) -> Result<()> {
        self.command(&format!("ENQUEUE {file_path}")).await?;
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.command("PLAY").await?;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.command("PAUSE").await?;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.command("RESUME").await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.command("CLEAR").await?;
        Ok(())
    }
}

/// Parses a `STATUS` response of the form
/// `playing=<0|1> file=<path|-> position=<n|-> title=<..|-> artist=<..|-> genre=<..|->`.
/// Any field the mixer omits is left at its default; this tolerates a mixer
/// that reports a subset of fields rather than failing the poll.
fn parse_status_line(line: &str) -> QueueStatus {
    let mut status = QueueStatus::default();
    for field in line.split_whitespace() {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let value = if value == "-" { None } else { Some(value.to_string()) };
        match key {
            "playing" => status.playing = value.as_deref() == Some("1"),
            "file" => status.file_path = value,
            "position" => status.position = value.and_then(|v| v.parse().ok()),
            "title" => status.metadata.title = value,
            "artist" => status.metadata.artist = value,
            "genre" => status.metadata.genre = value,
            _ => {}
        }
    }
    status
}

/// Telnet-style implementation of [`MixerControlChannel`]: sends
/// `DISCONNECT <session_id>` and does not wait for a reply — per the
/// watchdog's timeout contract, the disconnect callback is the source of
/// truth, not this command's acknowledgment.
pub struct TcpMixerControlChannel {
    address: String,
}

impl TcpMixerControlChannel {
    #[must_use]
    pub fn new(address: String) -> Self {
        Self { address }
    }
}

#[async_trait]
impl MixerControlChannel for TcpMixerControlChannel {
    async fn force_disconnect(&self, session_id: &str) -> Result<()> {
        let mut stream = timeout(COMMAND_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| Error::TemporarilyUnavailable(format!("mixer control channel {} timed out", self.address)))?
            .map_err(|e| Error::TemporarilyUnavailable(format!("mixer control channel {} unreachable: {e}", self.address)))?;

        timeout(
            COMMAND_TIMEOUT,
            stream.write_all(format!("DISCONNECT {session_id}\n").as_bytes()),
        )
        .await
        .map_err(|_| Error::TemporarilyUnavailable("mixer disconnect command timed out".to_string()))?
        .map_err(|e| Error::TemporarilyUnavailable(format!("mixer disconnect write failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_line_reads_all_fields() {
        let status = parse_status_line("playing=1 file=/tmp/a.ogg position=42 title=Foo artist=Bar genre=-");
        assert!(status.playing);
        assert_eq!(status.file_path.as_deref(), Some("/tmp/a.ogg"));
        assert_eq!(status.position, Some(42));
        assert_eq!(status.metadata.title.as_deref(), Some("Foo"));
        assert_eq!(status.metadata.artist.as_deref(), Some("Bar"));
        assert_eq!(status.metadata.genre, None);
    }

    #[test]
    fn parse_status_line_tolerates_missing_fields() {
        let status = parse_status_line("playing=0");
        assert!(!status.playing);
        assert_eq!(status.file_path, None);
    }
}
