pub mod emby;
pub mod jellyfin;
pub mod plex;
pub mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};

use crate::error::{MonitorError, Result};
use vigil_model::{
    ActiveStream, ItemDetails, Library, LibraryItemCache, Server, ServerKind,
    WatchHistoryEntry,
};

pub use rate_limit::TokenBucket;

/// One page of a library enumeration. `next` is an opaque vendor cursor;
/// `None` means the enumeration is complete. `total` is the vendor-reported
/// item count when the vendor paginates with one.
#[derive(Debug, Clone)]
pub struct ItemBatch {
    pub items: Vec<LibraryItemCache>,
    pub next: Option<String>,
    pub total: Option<i64>,
}

/// The capability set every vendor adapter implements.
///
/// Adapters encode vendor quirks exhaustively and expose only canonical
/// types; the core never sees a vendor payload or inspects a vendor error
/// string. Adapters are stateless apart from the pooled HTTP client and a
/// per-server token bucket.
#[async_trait]
pub trait MediaServerAdapter: Send + Sync {
    /// Snapshot of current playback.
    async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>>;

    /// Historical entries, used for imports and back-fill.
    async fn list_history(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<WatchHistoryEntry>>;

    async fn list_libraries(&self) -> Result<Vec<Library>>;

    async fn list_library_items(
        &self,
        library: &Library,
        cursor: Option<String>,
    ) -> Result<ItemBatch>;

    /// Remove an item from the server. Fails with `NotFound`, `Forbidden`
    /// or `Transient`.
    async fn delete_item(&self, item_id: &str) -> Result<()>;

    async fn get_item_details(&self, item_id: &str) -> Result<ItemDetails>;

    /// Cheap reachability check used by the admin connection test.
    async fn ping(&self) -> Result<()>;
}

/// Build the adapter for `server`, keyed on its kind.
pub fn adapter_for(
    server: &Server,
    client: Client,
    requests_per_second: u32,
) -> Arc<dyn MediaServerAdapter> {
    let bucket = TokenBucket::new(requests_per_second);
    match server.kind {
        ServerKind::Plex => {
            Arc::new(plex::PlexAdapter::new(server, client, bucket))
        }
        ServerKind::Emby => {
            Arc::new(emby::EmbyAdapter::new(server, client, bucket))
        }
        ServerKind::Jellyfin => {
            Arc::new(jellyfin::JellyfinAdapter::new(server, client, bucket))
        }
    }
}

/// Live adapters keyed by server id. The monitor runtime is the writer
/// (server CRUD refreshes entries); everything else resolves read-only.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    inner: std::sync::Arc<dashmap::DashMap<uuid::Uuid, Arc<dyn MediaServerAdapter>>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("servers", &self.inner.len())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn insert(
        &self,
        server_id: uuid::Uuid,
        adapter: Arc<dyn MediaServerAdapter>,
    ) {
        self.inner.insert(server_id, adapter);
    }

    pub fn get(
        &self,
        server_id: &uuid::Uuid,
    ) -> Option<Arc<dyn MediaServerAdapter>> {
        self.inner.get(server_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, server_id: &uuid::Uuid) {
        self.inner.remove(server_id);
    }
}

/// Map a vendor HTTP status onto the canonical error kinds.
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().clone();
    match status {
        StatusCode::NOT_FOUND => Err(MonitorError::not_found(format!(
            "{url} returned 404"
        ))),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(MonitorError::Forbidden(format!("{url} returned {status}")))
        }
        s if s.is_server_error() => Err(MonitorError::transient(format!(
            "{url} returned {status}"
        ))),
        _ => Err(MonitorError::internal(format!(
            "{url} returned unexpected {status}"
        ))),
    }
}

/// Ten-minute bucket of a computed start time.
///
/// Vendors that reuse session keys across reconnects need the start bucket
/// folded into the session identity so one continuous playback keeps one
/// identity while a later replay gets a fresh one. The start time itself is
/// derived from `now - position`, which drifts by at most poll jitter, so a
/// coarse bucket is stable across polls.
pub(crate) fn started_at_bucket(started_at: DateTime<Utc>) -> i64 {
    started_at.timestamp() / 600
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn start_bucket_is_stable_under_jitter() {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap();
        let jittered = base + chrono::Duration::seconds(4);
        assert_eq!(started_at_bucket(base), started_at_bucket(jittered));
    }
}
