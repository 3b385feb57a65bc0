use serde::{Deserialize, Serialize};

use crate::ids::{PrincipalId, SongId};

/// The two queues the mixer consumes. `user` is bounded and drains; the
/// Queue Controller removes a song from it once the mixer reports playback
/// finished. `fallback` is unbounded and loops; nothing ever removes from it
/// automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    User,
    Fallback,
}

impl QueueKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "fallback" => Ok(Self::Fallback),
            other => Err(crate::Error::BadInput(format!("unknown queue: {other}"))),
        }
    }
}

/// A single playable entry in a queue, identified by a stable fingerprint of
/// its source content for duplicate suppression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Song {
    pub song_id: SongId,
    pub queue: QueueKind,
    pub owner_principal_id: Option<PrincipalId>,
    pub file_path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub duration_seconds: u64,
    pub fingerprint: String,
}

/// Per-`user`-principal counters tracked in the State Store. `queued_count`
/// decreases on deletion or mixer-reported completion; `lifetime_add_count`
/// is monotonic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UserQuotaState {
    pub queued_count: u32,
    pub lifetime_add_count: u32,
}
