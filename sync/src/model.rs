use api_client::{EventRow, MediaRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A gallery photo with uploader name and like aggregate resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub event_id: String,
    pub user_id: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub likes_count: u32,
    pub user_has_liked: bool,
}

impl MediaItem {
    pub(crate) fn from_row(
        row: MediaRow,
        display_name: String,
        likes_count: u32,
        user_has_liked: bool,
    ) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            url: row.url,
            created_at: row.created_at,
            display_name,
            likes_count,
            user_has_liked,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub creator_display_name: Option<String>,
}

impl EventContext {
    pub fn is_creator(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }
}

impl From<EventRow> for EventContext {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_by: row.created_by,
            creator_display_name: row.creator_display_name,
        }
    }
}

/// Snapshot published by the repository after each reload or local patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryState {
    pub event: Option<EventContext>,
    pub items: Vec<MediaItem>,
    /// Generation of the reload that produced `items`; 0 before the first one.
    pub generation: u64,
    /// Likes could not be fetched and were treated as zero.
    pub likes_degraded: bool,
}
