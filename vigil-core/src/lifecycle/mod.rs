pub mod events;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::ports::{
    HistoryRepository, SessionSnapshot, SessionSnapshotRepository,
};
use crate::error::Result;
use events::{EventReceiver, EventSender, SessionEvent};
use vigil_model::{
    ActiveStream, GeoResult, SessionKey, SessionState, WatchHistoryEntry,
};

/// Geo enrichment seam; the geo service implements it, tests stub it.
#[async_trait]
pub trait GeoEnricher: Send + Sync {
    async fn enrich(&self, ip: &str) -> Option<GeoResult>;
}

/// One poll's worth of input for the lifecycle.
#[derive(Debug)]
pub enum PollOutcome {
    /// Successful poll: the complete session set for the server.
    Sessions {
        server_id: Uuid,
        streams: Vec<ActiveStream>,
    },
    /// Transient poll failure: the server's session set is unknown for this
    /// tick, so nothing may be inferred from absence.
    Failed { server_id: Uuid },
}

struct TrackedSession {
    stream: ActiveStream,
    /// Monotone max of observed progress; seeks regress the live counter
    /// but never this.
    watched_ms: i64,
    /// Consecutive successful polls the session has been absent from.
    misses: u32,
}

/// Read-only view of the in-memory session map for other components.
#[derive(Clone, Default)]
pub struct ActiveSessions {
    inner: Arc<DashMap<SessionKey, ActiveStream>>,
}

impl std::fmt::Debug for ActiveSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSessions")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl ActiveSessions {
    pub fn all(&self) -> Vec<ActiveStream> {
        self.inner.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn for_user(&self, user_name: &str) -> Vec<ActiveStream> {
        self.inner
            .iter()
            .filter(|entry| entry.value().user_name == user_name)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Owner of the in-memory session map.
///
/// All session events are processed by one task (`run`); every other
/// component sees only [`ActiveSessions`] snapshots or bus events.
pub struct SessionLifecycle {
    sessions: HashMap<SessionKey, TrackedSession>,
    published: ActiveSessions,
    history: Arc<dyn HistoryRepository>,
    snapshots: Arc<dyn SessionSnapshotRepository>,
    geo: Option<Arc<dyn GeoEnricher>>,
    events: EventSender,
    stop_after_misses: u32,
}

impl SessionLifecycle {
    pub fn new(
        history: Arc<dyn HistoryRepository>,
        snapshots: Arc<dyn SessionSnapshotRepository>,
        geo: Option<Arc<dyn GeoEnricher>>,
        events: EventSender,
        stop_after_misses: u32,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            published: ActiveSessions::default(),
            history,
            snapshots,
            geo,
            events,
            stop_after_misses: stop_after_misses.max(1),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn active_sessions(&self) -> ActiveSessions {
        self.published.clone()
    }

    /// Flush sessions that were active when a previous process died.
    ///
    /// Each drained snapshot becomes one history entry with
    /// `stopped_at = last_poll_seen`; the dedup key makes a replayed
    /// recovery a no-op.
    pub async fn recover(&self) -> Result<usize> {
        let stale = self.snapshots.drain().await?;
        let mut flushed = 0;
        for snapshot in stale {
            let entry = self
                .close_entry(
                    &snapshot.stream,
                    snapshot.watched_ms,
                    snapshot.last_poll_seen,
                )
                .await;
            if self.history.insert(&entry).await? {
                flushed += 1;
            }
        }
        if flushed > 0 {
            info!(flushed, "recovered sessions from previous run");
        }
        Ok(flushed)
    }

    /// Process poll outcomes until the channel closes or `cancel` fires,
    /// then flush everything still active.
    pub async fn run(
        mut self,
        mut outcomes: mpsc::Receiver<PollOutcome>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => {
                        if let Err(e) = self.handle(outcome, Utc::now()).await {
                            warn!("lifecycle failed to process poll: {e}");
                        }
                    }
                    None => break,
                },
            }
        }
        if let Err(e) = self.flush_all().await {
            warn!("lifecycle shutdown flush failed: {e}");
        }
    }

    /// Apply one poll outcome at `now`.
    pub async fn handle(
        &mut self,
        outcome: PollOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match outcome {
            // Unknown session set: no upserts, no absence counting.
            PollOutcome::Failed { server_id } => {
                debug!(%server_id, "poll failed, holding session state");
                Ok(())
            }
            PollOutcome::Sessions { server_id, streams } => {
                self.apply_sessions(server_id, streams, now).await
            }
        }
    }

    async fn apply_sessions(
        &mut self,
        server_id: Uuid,
        streams: Vec<ActiveStream>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut seen: Vec<SessionKey> = Vec::with_capacity(streams.len());

        for mut stream in streams {
            stream.last_poll_seen = Some(now);
            let key = stream.key();
            seen.push(key.clone());

            let tracked = self
                .sessions
                .entry(key.clone())
                .and_modify(|tracked| {
                    tracked.watched_ms =
                        tracked.watched_ms.max(stream.progress_ms);
                    tracked.stream = stream.clone();
                    tracked.misses = 0;
                })
                .or_insert_with(|| TrackedSession {
                    watched_ms: stream.progress_ms,
                    stream: stream.clone(),
                    misses: 0,
                });

            self.published.inner.insert(key.clone(), stream.clone());
            self.snapshots
                .upsert(&SessionSnapshot {
                    stream: stream.clone(),
                    watched_ms: tracked.watched_ms,
                    last_poll_seen: now,
                })
                .await?;
            let _ = self.events.send(SessionEvent::Update { stream });
        }

        // Absence counting covers this server only, and only because the
        // poll succeeded.
        let mut stopping = Vec::new();
        for (key, tracked) in self.sessions.iter_mut() {
            if key.server_id != server_id || seen.contains(key) {
                continue;
            }
            tracked.misses += 1;
            if tracked.misses >= self.stop_after_misses {
                stopping.push(key.clone());
            }
        }

        for key in stopping {
            self.close_session(&key, now).await?;
        }
        Ok(())
    }

    /// Persist the terminal history entry and drop the in-memory record.
    async fn close_session(
        &mut self,
        key: &SessionKey,
        stopped_at: DateTime<Utc>,
    ) -> Result<()> {
        let Some(tracked) = self.sessions.remove(key) else {
            return Ok(());
        };
        self.published.inner.remove(key);

        let entry = self
            .close_entry(&tracked.stream, tracked.watched_ms, stopped_at)
            .await;
        let inserted = self.history.insert(&entry).await?;
        if !inserted {
            debug!(session = %key, "history entry already persisted");
        }
        self.snapshots.remove(key).await?;
        let _ = self.events.send(SessionEvent::Stop { entry });
        info!(session = %key, user = %tracked.stream.user_name, "session stopped");
        Ok(())
    }

    async fn close_entry(
        &self,
        stream: &ActiveStream,
        watched_ms: i64,
        stopped_at: DateTime<Utc>,
    ) -> WatchHistoryEntry {
        let mut stream = stream.clone();
        stream.state = SessionState::Stopped;
        let mut entry =
            WatchHistoryEntry::from_stream(&stream, watched_ms, stopped_at);
        if let Some(geo) = &self.geo
            && let Some(result) = geo.enrich(&entry.ip_address).await
            && !result.private
        {
            entry.city = result.city;
            entry.country = result.country;
            entry.isp = result.isp;
        }
        entry
    }

    /// Shutdown path: every active session closes with
    /// `stopped_at = last_poll_seen`.
    pub async fn flush_all(&mut self) -> Result<usize> {
        let keys: Vec<SessionKey> = self.sessions.keys().cloned().collect();
        let mut flushed = 0;
        for key in keys {
            let stopped_at = self
                .sessions
                .get(&key)
                .and_then(|t| t.stream.last_poll_seen)
                .unwrap_or_else(Utc::now);
            self.close_session(&key, stopped_at).await?;
            flushed += 1;
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use vigil_model::TranscodeInfo;

    struct FakeHistory {
        entries: Mutex<Vec<WatchHistoryEntry>>,
        keys: Mutex<HashSet<(Uuid, String, i64)>>,
    }

    impl FakeHistory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(Vec::new()),
                keys: Mutex::new(HashSet::new()),
            })
        }

        fn entries(&self) -> Vec<WatchHistoryEntry> {
            self.entries.lock().clone()
        }
    }

    #[async_trait]
    impl HistoryRepository for FakeHistory {
        async fn insert(&self, entry: &WatchHistoryEntry) -> Result<bool> {
            let key = (
                entry.server_id,
                entry.session_id.clone(),
                entry.started_at.timestamp_millis(),
            );
            if !self.keys.lock().insert(key) {
                return Ok(false);
            }
            self.entries.lock().push(entry.clone());
            Ok(true)
        }

        async fn query(
            &self,
            _query: &vigil_model::HistoryQuery,
        ) -> Result<vigil_model::HistoryPage> {
            unimplemented!()
        }

        async fn recent_for_user(
            &self,
            _user_name: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<WatchHistoryEntry>> {
            Ok(Vec::new())
        }

        async fn last_for_user(
            &self,
            _user_name: &str,
        ) -> Result<Option<WatchHistoryEntry>> {
            Ok(None)
        }

        async fn users_since(
            &self,
            _since: DateTime<Utc>,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn devices_for_user(
            &self,
            _user_name: &str,
        ) -> Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeSnapshots {
        stored: Mutex<HashMap<SessionKey, SessionSnapshot>>,
    }

    #[async_trait]
    impl SessionSnapshotRepository for FakeSnapshots {
        async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<()> {
            self.stored
                .lock()
                .insert(snapshot.stream.key(), snapshot.clone());
            Ok(())
        }

        async fn remove(&self, key: &SessionKey) -> Result<()> {
            self.stored.lock().remove(key);
            Ok(())
        }

        async fn drain(&self) -> Result<Vec<SessionSnapshot>> {
            Ok(self.stored.lock().drain().map(|(_, v)| v).collect())
        }
    }

    fn stream(server_id: Uuid, session: &str, progress_ms: i64) -> ActiveStream {
        ActiveStream {
            server_id,
            session_id: session.to_string(),
            user_name: "alice".into(),
            state: SessionState::Playing,
            item_id: "1".into(),
            grandparent_item_id: None,
            title: "Movie".into(),
            grandparent_title: None,
            media_type: "movie".into(),
            duration_ms: Some(7_200_000),
            progress_ms,
            transcode: TranscodeInfo::default(),
            player: "web".into(),
            platform: "chrome".into(),
            ip_address: "203.0.113.1".into(),
            thumb_url: None,
            started_at: Utc::now(),
            last_poll_seen: None,
        }
    }

    fn lifecycle(
        history: Arc<FakeHistory>,
        misses: u32,
    ) -> SessionLifecycle {
        SessionLifecycle::new(
            history,
            Arc::new(FakeSnapshots::default()),
            None,
            events::event_bus(64),
            misses,
        )
    }

    fn tick(server_id: Uuid, streams: Vec<ActiveStream>) -> PollOutcome {
        PollOutcome::Sessions { server_id, streams }
    }

    #[tokio::test]
    async fn stop_detection_survives_transient_failure() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 2);
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        // Tick1 sees the session, tick2 errors, ticks 3 and 4 see nothing.
        lifecycle
            .handle(tick(server, vec![stream(server, "s1", 1000)]), t0)
            .await
            .unwrap();
        lifecycle
            .handle(
                PollOutcome::Failed { server_id: server },
                t0 + chrono::Duration::seconds(5),
            )
            .await
            .unwrap();
        assert!(history.entries().is_empty());

        lifecycle
            .handle(tick(server, vec![]), t0 + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert!(history.entries().is_empty());

        let t4 = t0 + chrono::Duration::seconds(15);
        lifecycle.handle(tick(server, vec![]), t4).await.unwrap();

        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stopped_at, t4);
        assert!(lifecycle.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn watched_ms_is_monotone_max() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 1);
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        // Progress advances, then regresses on a seek.
        for (i, progress) in [1000i64, 900_000, 20_000].iter().enumerate() {
            lifecycle
                .handle(
                    tick(server, vec![stream(server, "s1", *progress)]),
                    t0 + chrono::Duration::seconds(5 * i as i64),
                )
                .await
                .unwrap();
        }
        lifecycle
            .handle(tick(server, vec![]), t0 + chrono::Duration::seconds(20))
            .await
            .unwrap();

        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].watched_ms, 900_000);
    }

    #[tokio::test]
    async fn map_mirrors_poll_result() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 2);
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        lifecycle
            .handle(
                tick(
                    server,
                    vec![stream(server, "a", 0), stream(server, "b", 0)],
                ),
                t0,
            )
            .await
            .unwrap();
        assert_eq!(lifecycle.active_sessions().len(), 2);

        lifecycle
            .handle(
                tick(server, vec![stream(server, "a", 100)]),
                t0 + chrono::Duration::seconds(5),
            )
            .await
            .unwrap();
        // "b" is missing once; with N=2 it is still tracked.
        assert_eq!(lifecycle.active_sessions().len(), 2);

        lifecycle
            .handle(
                tick(server, vec![stream(server, "a", 200)]),
                t0 + chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        assert_eq!(lifecycle.active_sessions().len(), 1);
        assert_eq!(history.entries().len(), 1);
    }

    #[tokio::test]
    async fn failure_does_not_reset_miss_count() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 2);
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        lifecycle
            .handle(tick(server, vec![stream(server, "s1", 0)]), t0)
            .await
            .unwrap();
        lifecycle
            .handle(tick(server, vec![]), t0 + chrono::Duration::seconds(5))
            .await
            .unwrap();
        lifecycle
            .handle(
                PollOutcome::Failed { server_id: server },
                t0 + chrono::Duration::seconds(10),
            )
            .await
            .unwrap();
        lifecycle
            .handle(tick(server, vec![]), t0 + chrono::Duration::seconds(15))
            .await
            .unwrap();

        assert_eq!(history.entries().len(), 1);
    }

    #[tokio::test]
    async fn other_servers_are_untouched() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 1);
        let server_a = Uuid::new_v4();
        let server_b = Uuid::new_v4();
        let t0 = Utc::now();

        lifecycle
            .handle(tick(server_a, vec![stream(server_a, "a", 0)]), t0)
            .await
            .unwrap();
        lifecycle
            .handle(
                tick(server_b, vec![]),
                t0 + chrono::Duration::seconds(5),
            )
            .await
            .unwrap();

        // Server B reporting empty says nothing about server A's session.
        assert_eq!(lifecycle.active_sessions().len(), 1);
        assert!(history.entries().is_empty());
    }

    mockall::mock! {
        Enricher {}

        #[async_trait]
        impl GeoEnricher for Enricher {
            async fn enrich(&self, ip: &str) -> Option<GeoResult>;
        }
    }

    #[tokio::test]
    async fn stop_entries_carry_geo_enrichment() {
        let mut enricher = MockEnricher::new();
        enricher.expect_enrich().returning(|ip| {
            Some(GeoResult {
                ip: ip.to_string(),
                city: Some("Denver".into()),
                country: Some("United States".into()),
                isp: Some("ExampleNet".into()),
                latitude: None,
                longitude: None,
                private: false,
            })
        });

        let history = FakeHistory::new();
        let mut lifecycle = SessionLifecycle::new(
            history.clone(),
            Arc::new(FakeSnapshots::default()),
            Some(Arc::new(enricher)),
            events::event_bus(64),
            1,
        );
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        lifecycle
            .handle(tick(server, vec![stream(server, "s1", 1000)]), t0)
            .await
            .unwrap();
        lifecycle
            .handle(tick(server, vec![]), t0 + chrono::Duration::seconds(5))
            .await
            .unwrap();

        let entries = history.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].city.as_deref(), Some("Denver"));
        assert_eq!(entries[0].country.as_deref(), Some("United States"));
    }

    #[tokio::test]
    async fn flush_all_uses_last_poll_seen() {
        let history = FakeHistory::new();
        let mut lifecycle = lifecycle(history.clone(), 2);
        let server = Uuid::new_v4();
        let t0 = Utc::now();

        lifecycle
            .handle(tick(server, vec![stream(server, "s1", 5000)]), t0)
            .await
            .unwrap();
        let flushed = lifecycle.flush_all().await.unwrap();

        assert_eq!(flushed, 1);
        let entries = history.entries();
        assert_eq!(entries[0].stopped_at, t0);
        assert_eq!(entries[0].watched_ms, 5000);
    }
}
