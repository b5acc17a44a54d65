use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::{ActiveStream, TranscodeInfo};

/// Immutable record of a completed (or stopped) playback session.
///
/// Natural uniqueness is `(server_id, session_id, started_at)`; the
/// persistence layer treats a second write of the same tuple as a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchHistoryEntry {
    pub id: i64,
    pub server_id: Uuid,
    pub session_id: String,
    pub user_name: String,
    pub item_id: String,
    pub grandparent_item_id: Option<String>,
    pub title: String,
    pub grandparent_title: Option<String>,
    pub media_type: String,
    pub duration_ms: Option<i64>,
    /// Monotone maximum progress observed across the session's polls.
    pub watched_ms: i64,
    pub transcode: TranscodeInfo,
    pub player: String,
    pub platform: String,
    pub ip_address: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub isp: Option<String>,
}

impl WatchHistoryEntry {
    /// Build an entry from a tracked stream closing at `stopped_at`.
    ///
    /// The id is a placeholder until the persistence layer assigns one.
    pub fn from_stream(
        stream: &ActiveStream,
        watched_ms: i64,
        stopped_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            server_id: stream.server_id,
            session_id: stream.session_id.clone(),
            user_name: stream.user_name.clone(),
            item_id: stream.item_id.clone(),
            grandparent_item_id: stream.grandparent_item_id.clone(),
            title: stream.title.clone(),
            grandparent_title: stream.grandparent_title.clone(),
            media_type: stream.media_type.clone(),
            duration_ms: stream.duration_ms,
            watched_ms,
            transcode: stream.transcode.clone(),
            player: stream.player.clone(),
            platform: stream.platform.clone(),
            ip_address: stream.ip_address.clone(),
            started_at: stream.started_at,
            stopped_at,
            city: None,
            country: None,
            isp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

/// Paginated history query parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub page: u32,
    pub per_page: u32,
    pub sort_by: String,
    pub sort_order: SortOrder,
    pub server_ids: Vec<Uuid>,
    pub user_name: Option<String>,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            sort_by: "stopped_at".to_string(),
            sort_order: SortOrder::Desc,
            server_ids: Vec::new(),
            user_name: None,
        }
    }
}

impl HistoryQuery {
    pub fn offset(&self) -> i64 {
        let page = self.page.max(1);
        i64::from(page - 1) * i64::from(self.per_page)
    }
}

/// One page of history results.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub entries: Vec<WatchHistoryEntry>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}
