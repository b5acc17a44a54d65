use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use vigil_model::{ExternalIds, LibraryItemCache, MediaType};

#[async_trait]
pub trait LibraryItemRepository: Send + Sync {
    /// Insert or refresh one cached item on its natural key
    /// `(server_id, library_id, item_id)`. Returns the surrogate id.
    async fn upsert(&self, item: &LibraryItemCache) -> Result<i64>;

    /// Tombstone items of `(server_id, library_id)` whose `synced_at`
    /// precedes `synced_before`: they were absent from the completed pass.
    /// Returns the number of rows removed.
    async fn delete_absent(
        &self,
        server_id: Uuid,
        library_id: &str,
        synced_before: DateTime<Utc>,
    ) -> Result<u64>;

    async fn update_watch_stats(
        &self,
        server_id: Uuid,
        library_id: &str,
        item_id: &str,
        last_watched_at: Option<DateTime<Utc>>,
        play_count: i64,
    ) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<LibraryItemCache>>;

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<LibraryItemCache>>;

    /// All cached items within the given scopes, optionally gated on
    /// media type.
    async fn items_in_scopes(
        &self,
        scopes: &[(Uuid, String)],
        media_type: Option<MediaType>,
    ) -> Result<Vec<LibraryItemCache>>;

    /// Number of other enabled servers whose cache holds an item with the
    /// same preferred external id. Zero when `ids` carries none.
    async fn cross_server_count(
        &self,
        server_id: Uuid,
        ids: &ExternalIds,
    ) -> Result<i64>;
}
