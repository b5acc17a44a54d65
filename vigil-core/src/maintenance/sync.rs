use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::database::ports::LibraryItemRepository;
use crate::error::{MonitorError, Result};
use vigil_model::{Library, MediaType, SyncPhase, SyncProgress};

pub fn sync_key(server_id: Uuid, library_id: &str) -> String {
    format!("{server_id}:{library_id}")
}

/// Per-library background sync with the two-phase progress model.
///
/// At most one sync runs per `(server, library)` key; a concurrent request
/// gets `Conflict` without mutating anything. Different keys run in
/// parallel up to the worker bound. A finished sync stays visible as
/// `done` for one status poll, then disappears; an errored one stays until
/// a follow-up sync replaces it.
pub struct SyncManager {
    items: Arc<dyn LibraryItemRepository>,
    adapters: AdapterRegistry,
    progress: Arc<DashMap<String, SyncProgress>>,
    observed_done: Arc<Mutex<std::collections::HashSet<String>>>,
    workers: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("active", &self.progress.len())
            .finish()
    }
}

impl SyncManager {
    pub fn new(
        items: Arc<dyn LibraryItemRepository>,
        adapters: AdapterRegistry,
        workers: usize,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            items,
            adapters,
            progress: Arc::new(DashMap::new()),
            observed_done: Arc::new(Mutex::new(Default::default())),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            cancel,
        })
    }

    /// Current progress per key. `done` entries survive exactly one
    /// observation.
    pub fn status(&self) -> HashMap<String, SyncProgress> {
        let mut out = HashMap::new();
        let mut reaped = Vec::new();
        {
            let mut observed = self.observed_done.lock();
            for entry in self.progress.iter() {
                out.insert(entry.key().clone(), entry.value().clone());
                if entry.value().phase == SyncPhase::Done {
                    if observed.contains(entry.key()) {
                        reaped.push(entry.key().clone());
                        observed.remove(entry.key());
                    } else {
                        observed.insert(entry.key().clone());
                    }
                }
            }
        }
        for key in reaped {
            self.progress.remove(&key);
            out.remove(&key);
        }
        out
    }

    /// Kick off a sync. Returns immediately; progress is observable via
    /// [`SyncManager::status`].
    pub fn start_sync(
        self: &Arc<Self>,
        server_id: Uuid,
        library_id: String,
    ) -> Result<()> {
        let key = sync_key(server_id, &library_id);
        match self.progress.entry(key.clone()) {
            Entry::Occupied(occupied)
                if matches!(
                    occupied.get().phase,
                    SyncPhase::Items | SyncPhase::History
                ) =>
            {
                return Err(MonitorError::conflict(format!(
                    "sync already running for {key}"
                )));
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(initial_progress(server_id, &library_id));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(initial_progress(server_id, &library_id));
            }
        }
        self.observed_done.lock().remove(&key);

        let manager = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = manager.workers.clone().acquire_owned().await
            else {
                return;
            };
            if let Err(e) =
                manager.run_sync(server_id, &library_id, &key).await
            {
                warn!(key = %key, "library sync failed: {e}");
                manager.update(&key, |p| {
                    p.phase = SyncPhase::Error;
                    p.error = Some(e.to_string());
                });
            }
        });
        Ok(())
    }

    fn update(&self, key: &str, f: impl FnOnce(&mut SyncProgress)) {
        if let Some(mut entry) = self.progress.get_mut(key) {
            f(entry.value_mut());
        }
    }

    async fn run_sync(
        &self,
        server_id: Uuid,
        library_id: &str,
        key: &str,
    ) -> Result<()> {
        let adapter = self.adapters.get(&server_id).ok_or_else(|| {
            MonitorError::not_found(format!("no adapter for server {server_id}"))
        })?;
        let library = adapter
            .list_libraries()
            .await?
            .into_iter()
            .find(|lib| lib.id == library_id)
            .ok_or_else(|| {
                MonitorError::not_found(format!(
                    "library {library_id} on server {server_id}"
                ))
            })?;

        let pass_started = Utc::now();
        self.items_phase(&adapter, &library, server_id, key).await?;

        // Items absent from the completed pass are gone from the source.
        let removed = self
            .items
            .delete_absent(server_id, library_id, pass_started)
            .await?;
        if removed > 0 {
            info!(key = %key, removed, "tombstoned items missing from source");
        }

        if matches!(library.media_type, MediaType::Movie | MediaType::Series) {
            self.history_phase(&adapter, &library, server_id, key)
                .await?;
        }

        self.update(key, |p| {
            p.phase = SyncPhase::Done;
        });
        info!(key = %key, "library sync complete");
        Ok(())
    }

    async fn items_phase(
        &self,
        adapter: &Arc<dyn crate::adapters::MediaServerAdapter>,
        library: &Library,
        server_id: Uuid,
        key: &str,
    ) -> Result<()> {
        let mut cursor = None;
        let mut current: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(MonitorError::Cancelled(
                    "sync aborted by shutdown".into(),
                ));
            }
            let batch =
                adapter.list_library_items(library, cursor.take()).await?;
            for item in &batch.items {
                debug_assert_eq!(item.server_id, server_id);
                self.items.upsert(item).await?;
                current += 1;
            }
            let total = batch.total.unwrap_or(0).max(0) as u64;
            self.update(key, |p| {
                p.current = current;
                p.total = total.max(current);
            });
            match batch.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(())
    }

    /// Second phase: replay vendor history into per-item watch stats. The
    /// total counts history records, which across rewatches can exceed the
    /// item count by a lot.
    async fn history_phase(
        &self,
        adapter: &Arc<dyn crate::adapters::MediaServerAdapter>,
        library: &Library,
        server_id: Uuid,
        key: &str,
    ) -> Result<()> {
        let cached = self
            .items
            .items_in_scopes(&[(server_id, library.id.clone())], None)
            .await?;
        let item_ids: std::collections::HashSet<&str> =
            cached.iter().map(|item| item.item_id.as_str()).collect();
        let parent_of: HashMap<&str, &str> = cached
            .iter()
            .filter_map(|item| {
                item.parent_item_id
                    .as_deref()
                    .map(|parent| (item.item_id.as_str(), parent))
            })
            .collect();

        let history = adapter.list_history(None).await?;
        self.update(key, |p| {
            p.phase = SyncPhase::History;
            p.current = 0;
            p.total = history.len() as u64;
        });

        #[derive(Default, Clone)]
        struct Stats {
            plays: i64,
            last: Option<DateTime<Utc>>,
        }
        let mut per_item: HashMap<String, Stats> = HashMap::new();
        let mut processed: u64 = 0;

        for record in &history {
            processed += 1;
            if !item_ids.contains(record.item_id.as_str()) {
                continue;
            }
            let stats = per_item.entry(record.item_id.clone()).or_default();
            stats.plays += 1;
            stats.last = stats.last.max(Some(record.stopped_at));

            // Episode plays roll up into their series row.
            if let Some(parent) = parent_of.get(record.item_id.as_str()) {
                let series = per_item.entry((*parent).to_string()).or_default();
                series.plays += 1;
                series.last = series.last.max(Some(record.stopped_at));
            }

            if processed % 100 == 0 {
                self.update(key, |p| p.current = processed);
            }
        }
        self.update(key, |p| p.current = processed);

        for (item_id, stats) in per_item {
            self.items
                .update_watch_stats(
                    server_id,
                    &library.id,
                    &item_id,
                    stats.last,
                    stats.plays,
                )
                .await?;
        }
        Ok(())
    }
}

fn initial_progress(server_id: Uuid, library_id: &str) -> SyncProgress {
    SyncProgress {
        server_id,
        library_id: library_id.to_string(),
        phase: SyncPhase::Items,
        current: 0,
        total: 0,
        error: None,
        started_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::adapters::{ItemBatch, MediaServerAdapter};
    use vigil_model::{
        ActiveStream, ExternalIds, ItemDetails, LibraryItemCache,
        WatchHistoryEntry,
    };

    struct SlowAdapter {
        server_id: Uuid,
        delay: Duration,
    }

    fn cache_item(server_id: Uuid, item_id: &str) -> LibraryItemCache {
        LibraryItemCache {
            id: 0,
            server_id,
            library_id: "lib".into(),
            item_id: item_id.into(),
            media_type: MediaType::Movie,
            title: item_id.into(),
            year: None,
            added_at: None,
            video_resolution: None,
            file_size: None,
            last_watched_at: None,
            play_count: 0,
            episode_count: None,
            parent_item_id: None,
            external_ids: ExternalIds::default(),
            synced_at: Utc::now(),
        }
    }

    #[async_trait]
    impl MediaServerAdapter for SlowAdapter {
        async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>> {
            Ok(Vec::new())
        }

        async fn list_history(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<WatchHistoryEntry>> {
            Ok(Vec::new())
        }

        async fn list_libraries(&self) -> Result<Vec<Library>> {
            Ok(vec![Library {
                id: "lib".into(),
                name: "Movies".into(),
                media_type: MediaType::Movie,
                item_count: Some(2),
            }])
        }

        async fn list_library_items(
            &self,
            _library: &Library,
            _cursor: Option<String>,
        ) -> Result<ItemBatch> {
            tokio::time::sleep(self.delay).await;
            Ok(ItemBatch {
                items: vec![
                    cache_item(self.server_id, "a"),
                    cache_item(self.server_id, "b"),
                ],
                next: None,
                total: Some(2),
            })
        }

        async fn delete_item(&self, _item_id: &str) -> Result<()> {
            Ok(())
        }

        async fn get_item_details(
            &self,
            _item_id: &str,
        ) -> Result<ItemDetails> {
            Err(MonitorError::not_found("none"))
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeItems {
        upserts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LibraryItemRepository for FakeItems {
        async fn upsert(&self, item: &LibraryItemCache) -> Result<i64> {
            self.upserts.lock().push(item.item_id.clone());
            Ok(1)
        }

        async fn delete_absent(
            &self,
            _server_id: Uuid,
            _library_id: &str,
            _synced_before: DateTime<Utc>,
        ) -> Result<u64> {
            Ok(0)
        }

        async fn update_watch_stats(
            &self,
            _server_id: Uuid,
            _library_id: &str,
            _item_id: &str,
            _last_watched_at: Option<DateTime<Utc>>,
            _play_count: i64,
        ) -> Result<()> {
            Ok(())
        }

        async fn get(&self, _id: i64) -> Result<Option<LibraryItemCache>> {
            Ok(None)
        }

        async fn get_many(
            &self,
            _ids: &[i64],
        ) -> Result<Vec<LibraryItemCache>> {
            Ok(Vec::new())
        }

        async fn items_in_scopes(
            &self,
            _scopes: &[(Uuid, String)],
            _media_type: Option<MediaType>,
        ) -> Result<Vec<LibraryItemCache>> {
            Ok(Vec::new())
        }

        async fn cross_server_count(
            &self,
            _server_id: Uuid,
            _ids: &ExternalIds,
        ) -> Result<i64> {
            Ok(0)
        }
    }

    async fn wait_for_done(manager: &Arc<SyncManager>, key: &str) {
        for _ in 0..200 {
            let status = manager.status();
            if let Some(progress) = status.get(key)
                && matches!(progress.phase, SyncPhase::Done | SyncPhase::Error)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sync did not finish");
    }

    #[tokio::test]
    async fn duplicate_start_conflicts_and_one_job_runs() {
        let server_id = Uuid::new_v4();
        let items = Arc::new(FakeItems::default());
        let adapters = AdapterRegistry::default();
        adapters.insert(
            server_id,
            Arc::new(SlowAdapter {
                server_id,
                delay: Duration::from_millis(50),
            }),
        );
        let manager = SyncManager::new(
            items.clone(),
            adapters,
            4,
            CancellationToken::new(),
        );

        manager.start_sync(server_id, "lib".into()).unwrap();
        let second = manager.start_sync(server_id, "lib".into());
        assert!(matches!(second, Err(MonitorError::Conflict(_))));

        let key = sync_key(server_id, "lib");
        wait_for_done(&manager, &key).await;
        // Exactly one sync ran: two items upserted, not four.
        assert_eq!(items.upserts.lock().len(), 2);
    }

    #[tokio::test]
    async fn done_is_visible_for_one_cycle() {
        let server_id = Uuid::new_v4();
        let items = Arc::new(FakeItems::default());
        let adapters = AdapterRegistry::default();
        adapters.insert(
            server_id,
            Arc::new(SlowAdapter {
                server_id,
                delay: Duration::from_millis(1),
            }),
        );
        let manager = SyncManager::new(
            items,
            adapters,
            4,
            CancellationToken::new(),
        );

        manager.start_sync(server_id, "lib".into()).unwrap();
        let key = sync_key(server_id, "lib");
        wait_for_done(&manager, &key).await;

        // wait_for_done observed the entry once already, so the next
        // status call reaps it.
        let after = manager.status();
        assert!(!after.contains_key(&key));
    }

    #[tokio::test]
    async fn missing_adapter_reports_error_phase() {
        let manager = SyncManager::new(
            Arc::new(FakeItems::default()),
            AdapterRegistry::default(),
            4,
            CancellationToken::new(),
        );
        let server_id = Uuid::new_v4();
        manager.start_sync(server_id, "lib".into()).unwrap();

        let key = sync_key(server_id, "lib");
        wait_for_done(&manager, &key).await;
        let status = manager.status();
        let progress = status.get(&key).unwrap();
        assert_eq!(progress.phase, SyncPhase::Error);
        assert!(progress.error.is_some());
    }
}
