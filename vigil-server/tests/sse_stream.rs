//! Router-level SSE tests: drive the bulk-delete and dashboard streams
//! through a real router and assert on the wire frames.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use futures_util::stream::Stream;
use tokio::time::sleep;
use uuid::Uuid;

use vigil_core::adapters::{ItemBatch, MediaServerAdapter};
use vigil_core::database::ports::{
    CandidatePage, LibraryItemRepository, MaintenanceRepository,
};
use vigil_core::error::{MonitorError, Result as CoreResult};
use vigil_core::lifecycle::events::{event_bus, EventReceiver, SessionEvent};
use vigil_core::{ActiveSessions, AdapterRegistry};
use vigil_model::{
    ActiveStream, ExternalIds, ItemDetails, Library, LibraryItemCache,
    MaintenanceCandidate, MaintenanceExclusion, MaintenanceRule, MediaType,
    SessionState, TranscodeInfo, WatchHistoryEntry,
};
use vigil_server::handlers::dashboard::dashboard_sse_stream;
use vigil_server::handlers::maintenance::{bulk_delete_sse, BulkDeleteRequest};

struct FakeMaintenance {
    candidates: Mutex<HashMap<i64, MaintenanceCandidate>>,
    excluded: HashSet<i64>,
}

impl FakeMaintenance {
    fn new(rule_id: Uuid, ids: &[i64], excluded: &[i64]) -> Self {
        Self {
            candidates: Mutex::new(
                ids.iter()
                    .map(|id| {
                        (
                            *id,
                            MaintenanceCandidate {
                                rule_id,
                                library_item_id: *id,
                                reason: "test".into(),
                                computed_at: Utc::now(),
                                cross_server_count: 0,
                            },
                        )
                    })
                    .collect(),
            ),
            excluded: excluded.iter().copied().collect(),
        }
    }

    fn unsupported<T>(&self, method: &str) -> CoreResult<T> {
        Err(MonitorError::internal(format!(
            "{method} not supported in FakeMaintenance"
        )))
    }
}

#[async_trait]
impl MaintenanceRepository for FakeMaintenance {
    async fn create_rule(&self, _rule: &MaintenanceRule) -> CoreResult<()> {
        self.unsupported("create_rule")
    }

    async fn update_rule(&self, _rule: &MaintenanceRule) -> CoreResult<()> {
        self.unsupported("update_rule")
    }

    async fn delete_rule(&self, _id: Uuid) -> CoreResult<()> {
        self.unsupported("delete_rule")
    }

    async fn get_rule(
        &self,
        _id: Uuid,
    ) -> CoreResult<Option<MaintenanceRule>> {
        Ok(None)
    }

    async fn list_rules(&self) -> CoreResult<Vec<MaintenanceRule>> {
        Ok(Vec::new())
    }

    async fn list_enabled_rules(&self) -> CoreResult<Vec<MaintenanceRule>> {
        Ok(Vec::new())
    }

    async fn replace_candidates(
        &self,
        _rule_id: Uuid,
        _candidates: &[MaintenanceCandidate],
    ) -> CoreResult<()> {
        self.unsupported("replace_candidates")
    }

    async fn candidates_page(
        &self,
        _rule_id: Uuid,
        _page: u32,
        _per_page: u32,
    ) -> CoreResult<CandidatePage> {
        self.unsupported("candidates_page")
    }

    async fn get_candidate(
        &self,
        _rule_id: Uuid,
        library_item_id: i64,
    ) -> CoreResult<Option<MaintenanceCandidate>> {
        Ok(self.candidates.lock().unwrap().get(&library_item_id).cloned())
    }

    async fn delete_candidate_and_item(
        &self,
        _rule_id: Uuid,
        library_item_id: i64,
    ) -> CoreResult<()> {
        self.candidates.lock().unwrap().remove(&library_item_id);
        Ok(())
    }

    async fn add_exclusion(
        &self,
        _exclusion: &MaintenanceExclusion,
    ) -> CoreResult<()> {
        self.unsupported("add_exclusion")
    }

    async fn remove_exclusion(
        &self,
        _rule_id: Uuid,
        _library_item_id: i64,
    ) -> CoreResult<()> {
        self.unsupported("remove_exclusion")
    }

    async fn list_exclusions(
        &self,
        _rule_id: Uuid,
    ) -> CoreResult<Vec<MaintenanceExclusion>> {
        Ok(Vec::new())
    }

    async fn is_excluded(
        &self,
        _rule_id: Uuid,
        library_item_id: i64,
    ) -> CoreResult<bool> {
        Ok(self.excluded.contains(&library_item_id))
    }
}

struct FakeItems {
    items: HashMap<i64, LibraryItemCache>,
}

impl FakeItems {
    fn new(server_id: Uuid, ids: &[i64]) -> Self {
        Self {
            items: ids
                .iter()
                .map(|id| {
                    (
                        *id,
                        LibraryItemCache {
                            id: *id,
                            server_id,
                            library_id: "lib".into(),
                            item_id: format!("vendor-{id}"),
                            media_type: MediaType::Movie,
                            title: format!("Item {id}"),
                            year: None,
                            added_at: None,
                            video_resolution: None,
                            file_size: Some(1_000_000_000),
                            last_watched_at: None,
                            play_count: 0,
                            episode_count: None,
                            parent_item_id: None,
                            external_ids: ExternalIds::default(),
                            synced_at: Utc::now(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn unsupported<T>(&self, method: &str) -> CoreResult<T> {
        Err(MonitorError::internal(format!(
            "{method} not supported in FakeItems"
        )))
    }
}

#[async_trait]
impl LibraryItemRepository for FakeItems {
    async fn upsert(&self, _item: &LibraryItemCache) -> CoreResult<i64> {
        self.unsupported("upsert")
    }

    async fn delete_absent(
        &self,
        _server_id: Uuid,
        _library_id: &str,
        _synced_before: DateTime<Utc>,
    ) -> CoreResult<u64> {
        self.unsupported("delete_absent")
    }

    async fn update_watch_stats(
        &self,
        _server_id: Uuid,
        _library_id: &str,
        _item_id: &str,
        _last_watched_at: Option<DateTime<Utc>>,
        _play_count: i64,
    ) -> CoreResult<()> {
        self.unsupported("update_watch_stats")
    }

    async fn get(&self, id: i64) -> CoreResult<Option<LibraryItemCache>> {
        Ok(self.items.get(&id).cloned())
    }

    async fn get_many(
        &self,
        _ids: &[i64],
    ) -> CoreResult<Vec<LibraryItemCache>> {
        Ok(Vec::new())
    }

    async fn items_in_scopes(
        &self,
        _scopes: &[(Uuid, String)],
        _media_type: Option<MediaType>,
    ) -> CoreResult<Vec<LibraryItemCache>> {
        Ok(Vec::new())
    }

    async fn cross_server_count(
        &self,
        _server_id: Uuid,
        _ids: &ExternalIds,
    ) -> CoreResult<i64> {
        Ok(0)
    }
}

struct DeletingAdapter;

#[async_trait]
impl MediaServerAdapter for DeletingAdapter {
    async fn list_active_sessions(&self) -> CoreResult<Vec<ActiveStream>> {
        Ok(Vec::new())
    }

    async fn list_history(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<WatchHistoryEntry>> {
        Ok(Vec::new())
    }

    async fn list_libraries(&self) -> CoreResult<Vec<Library>> {
        Ok(Vec::new())
    }

    async fn list_library_items(
        &self,
        _library: &Library,
        _cursor: Option<String>,
    ) -> CoreResult<ItemBatch> {
        Ok(ItemBatch {
            items: Vec::new(),
            next: None,
            total: Some(0),
        })
    }

    async fn delete_item(&self, _item_id: &str) -> CoreResult<()> {
        Ok(())
    }

    async fn get_item_details(&self, _item_id: &str) -> CoreResult<ItemDetails> {
        Err(MonitorError::not_found("none"))
    }

    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct BulkDeleteTestState {
    maintenance: Arc<dyn MaintenanceRepository>,
    items: Arc<dyn LibraryItemRepository>,
    adapters: AdapterRegistry,
}

async fn test_bulk_delete_handler(
    State(state): State<BulkDeleteTestState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    bulk_delete_sse(
        state.maintenance.clone(),
        state.items.clone(),
        state.adapters.clone(),
        request,
    )
}

#[tokio::test]
async fn bulk_delete_streams_progress_and_completes() {
    let rule_id = Uuid::new_v4();
    let server_id = Uuid::new_v4();
    let adapters = AdapterRegistry::default();
    adapters.insert(server_id, Arc::new(DeletingAdapter));

    // Candidates [1, 2, 3]; 2 was excluded between request and processing.
    let state = BulkDeleteTestState {
        maintenance: Arc::new(FakeMaintenance::new(rule_id, &[1, 2, 3], &[2])),
        items: Arc::new(FakeItems::new(server_id, &[1, 2, 3])),
        adapters,
    };
    let router = Router::new()
        .route(
            "/api/maintenance/candidates/bulk-delete",
            post(test_bulk_delete_handler),
        )
        .with_state(state);
    let server = TestServer::new(router).unwrap();

    let response = server
        .post("/api/maintenance/candidates/bulk-delete")
        .json(&serde_json::json!({
            "rule_id": rule_id,
            "candidate_ids": [1, 2, 3],
        }))
        .await;

    response.assert_status_success();
    let body = response.text();

    // Three progress frames plus the final complete frame.
    assert_eq!(body.matches("data:").count(), 4, "body: {body}");
    assert!(body.contains("event: complete"), "body: {body}");
    assert!(body.contains("\"deleted\":2"), "body: {body}");
    assert!(body.contains("\"skipped\":1"), "body: {body}");
    assert!(body.contains("\"failed\":0"), "body: {body}");
    assert!(body.contains("\"total_size\":2000000000"), "body: {body}");
}

#[derive(Clone)]
struct DashboardTestState {
    active: ActiveSessions,
    receiver: Arc<Mutex<Option<EventReceiver>>>,
}

async fn test_dashboard_handler(
    State(state): State<DashboardTestState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let receiver = state
        .receiver
        .lock()
        .unwrap()
        .take()
        .expect("stream subscribed once");
    dashboard_sse_stream(state.active.clone(), receiver)
}

fn sample_stream() -> ActiveStream {
    ActiveStream {
        server_id: Uuid::new_v4(),
        session_id: "s1".into(),
        user_name: "alice".into(),
        state: SessionState::Playing,
        item_id: "1".into(),
        grandparent_item_id: None,
        title: "Movie".into(),
        grandparent_title: None,
        media_type: "movie".into(),
        duration_ms: Some(7_200_000),
        progress_ms: 60_000,
        transcode: TranscodeInfo::default(),
        player: "web".into(),
        platform: "chrome".into(),
        ip_address: "203.0.113.1".into(),
        thumb_url: None,
        started_at: Utc::now(),
        last_poll_seen: None,
    }
}

#[tokio::test]
async fn dashboard_sse_snapshots_until_the_bus_closes() {
    let events = event_bus(16);
    let receiver = events.subscribe();
    let state = DashboardTestState {
        active: ActiveSessions::default(),
        receiver: Arc::new(Mutex::new(Some(receiver))),
    };
    let router = Router::new()
        .route("/api/dashboard/sse", get(test_dashboard_handler))
        .with_state(state);
    let server = TestServer::new(router).unwrap();

    // One session event after connect, then the bus closes and the stream
    // finishes, so the response body is complete.
    tokio::spawn(async move {
        sleep(Duration::from_millis(100)).await;
        let _ = events.send(SessionEvent::Update {
            stream: sample_stream(),
        });
        drop(events);
    });

    let response = server.get("/api/dashboard/sse").await;
    response.assert_status_success();
    let body = response.text();

    // Initial snapshot plus the event-triggered one.
    assert!(
        body.matches("data:").count() >= 2,
        "expected at least two snapshot frames, body: {body}"
    );
    assert!(body.contains("[]"), "body: {body}");
}
