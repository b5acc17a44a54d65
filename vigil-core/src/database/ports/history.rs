use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use vigil_model::{HistoryPage, HistoryQuery, WatchHistoryEntry};

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Insert one entry. Returns `false` when the natural key
    /// `(server_id, session_id, started_at)` already exists; the write is a
    /// no-op in that case.
    async fn insert(&self, entry: &WatchHistoryEntry) -> Result<bool>;

    async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage>;

    /// Entries for one user with `stopped_at >= since`, newest first.
    async fn recent_for_user(
        &self,
        user_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WatchHistoryEntry>>;

    /// The user's most recent entry, if any.
    async fn last_for_user(
        &self,
        user_name: &str,
    ) -> Result<Option<WatchHistoryEntry>>;

    /// Distinct users with any entry since `since`.
    async fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Every `(player, platform)` tuple ever observed for the user.
    async fn devices_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<(String, String)>>;
}
