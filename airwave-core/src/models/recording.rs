use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RecordingId, SessionId, ShowId};

/// A persisted, indexed capture of one accepted live session.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Recording {
    pub id: RecordingId,
    pub show_id: Option<ShowId>,
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub genre: Option<String>,
    pub description: Option<String>,
    pub file_path: String,
    pub duration_seconds: f64,
}

/// Pagination + filter parameters for `GET /recordings/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingQuery {
    pub show_name: Option<String>,
    pub search: Option<String>,
    pub genre: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl RecordingQuery {
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(20).clamp(1, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_are_clamped() {
        let query = RecordingQuery {
            page: Some(0),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), 100);
    }
}
