use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::confidence;
use super::context::EvaluationContext;
use super::evaluators::{self, ViolationDraft};
use crate::database::ports::{
    ChannelRepository, HistoryRepository, HouseholdRepository,
    NotificationQueueRepository, SharingRuleRepository, ViolationRepository,
};
use crate::error::Result;
use crate::geo::GeoService;
use crate::lifecycle::events::{EventReceiver, SessionEvent};
use crate::lifecycle::ActiveSessions;
use vigil_config::RulesConfig;
use vigil_model::{
    ActiveStream, GeoResult, Rule, RuleViolation, SessionState,
    WatchHistoryEntry,
};

/// Two-mode rule evaluator.
///
/// The real-time path consumes the lifecycle bus, one task per event,
/// bounded by the worker pool and serialized per user so a user's
/// violations persist in event order. The batch path runs the batch-only
/// rule types over recent history on a ticker.
pub struct RuleEngine {
    rules: Arc<dyn SharingRuleRepository>,
    violations: Arc<dyn ViolationRepository>,
    history: Arc<dyn HistoryRepository>,
    household: Arc<dyn HouseholdRepository>,
    channels: Arc<dyn ChannelRepository>,
    queue: Arc<dyn NotificationQueueRepository>,
    geo: Arc<GeoService>,
    active: ActiveSessions,
    config: RulesConfig,
    user_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("worker_pool", &self.config.worker_pool)
            .finish()
    }
}

/// Dedup bucket bounds containing `occurred_at`.
fn bucket_bounds(
    occurred_at: DateTime<Utc>,
    bucket_secs: i64,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let bucket_secs = bucket_secs.max(1);
    let ts = occurred_at.timestamp();
    let start_ts = ts - ts.rem_euclid(bucket_secs);
    let start = Utc
        .timestamp_opt(start_ts, 0)
        .single()
        .unwrap_or(occurred_at);
    (start, start + ChronoDuration::seconds(bucket_secs))
}

fn stream_from_entry(entry: &WatchHistoryEntry) -> ActiveStream {
    ActiveStream {
        server_id: entry.server_id,
        session_id: entry.session_id.clone(),
        user_name: entry.user_name.clone(),
        state: SessionState::Stopped,
        item_id: entry.item_id.clone(),
        grandparent_item_id: entry.grandparent_item_id.clone(),
        title: entry.title.clone(),
        grandparent_title: entry.grandparent_title.clone(),
        media_type: entry.media_type.clone(),
        duration_ms: entry.duration_ms,
        progress_ms: entry.watched_ms,
        transcode: entry.transcode.clone(),
        player: entry.player.clone(),
        platform: entry.platform.clone(),
        ip_address: entry.ip_address.clone(),
        thumb_url: None,
        started_at: entry.started_at,
        last_poll_seen: None,
    }
}

impl RuleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rules: Arc<dyn SharingRuleRepository>,
        violations: Arc<dyn ViolationRepository>,
        history: Arc<dyn HistoryRepository>,
        household: Arc<dyn HouseholdRepository>,
        channels: Arc<dyn ChannelRepository>,
        queue: Arc<dyn NotificationQueueRepository>,
        geo: Arc<GeoService>,
        active: ActiveSessions,
        config: RulesConfig,
    ) -> Self {
        Self {
            rules,
            violations,
            history,
            household,
            channels,
            queue,
            geo,
            active,
            config,
            user_locks: DashMap::new(),
        }
    }

    /// Real-time loop: drain the lifecycle bus until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut events: EventReceiver,
        cancel: CancellationToken,
    ) {
        let pool = Arc::new(Semaphore::new(self.config.worker_pool.max(1)));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        let Ok(permit) =
                            pool.clone().acquire_owned().await
                        else {
                            break;
                        };
                        let engine = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = engine.process_event(event).await {
                                warn!("rule evaluation failed: {e}");
                            }
                            drop(permit);
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "rule engine lagged, dropped oldest events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("rule engine stopped");
    }

    async fn process_event(&self, event: SessionEvent) -> Result<()> {
        let stream = match &event {
            SessionEvent::Update { stream } => stream.clone(),
            SessionEvent::Stop { entry } => stream_from_entry(entry),
        };
        let user = stream.user_name.clone();
        if user.is_empty() {
            return Ok(());
        }

        // Per-user serialization keeps a user's violations in event order;
        // events for different users still run in parallel.
        let lock = self
            .user_locks
            .entry(user.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let ctx = self.build_context(&user, Some(stream)).await?;
        let rules = self.rules.list_enabled().await?;
        for rule in rules.iter().filter(|r| r.rule_type.is_realtime()) {
            self.evaluate_one(rule, &ctx).await;
        }
        Ok(())
    }

    /// One pass of the batch-only rule types over recent users.
    pub async fn run_batch_once(&self) -> Result<()> {
        let window = ChronoDuration::from_std(self.config.history_window)
            .unwrap_or_else(|_| ChronoDuration::hours(24));
        let rules = self.rules.list_enabled().await?;
        let batch_rules: Vec<&Rule> = rules
            .iter()
            .filter(|r| !r.rule_type.is_realtime())
            .collect();
        if batch_rules.is_empty() {
            return Ok(());
        }

        let users = self.history.users_since(Utc::now() - window).await?;
        debug!(users = users.len(), "running batch rules");
        for user in users {
            let ctx = self.build_context(&user, None).await?;
            for rule in &batch_rules {
                self.evaluate_one(rule, &ctx).await;
            }
        }
        Ok(())
    }

    /// Evaluate one rule, treating any error as a per-rule skip.
    async fn evaluate_one(&self, rule: &Rule, ctx: &EvaluationContext) {
        match evaluators::evaluate(rule, ctx) {
            Ok(Some(draft)) => {
                if let Err(e) = self.record(rule, ctx, draft).await {
                    warn!(rule = %rule.name, "failed to record violation: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(rule = %rule.name, "rule skipped: {e}");
            }
        }
    }

    /// Persist a draft, collapsing duplicates within the dedup bucket. The
    /// survivor keeps the higher confidence and the union of details; only
    /// genuinely new violations fan out to notification channels.
    async fn record(
        &self,
        rule: &Rule,
        ctx: &EvaluationContext,
        draft: ViolationDraft,
    ) -> Result<()> {
        let confidence_score = confidence::score(&draft.signals);
        let occurred_at = ctx.now;
        let bucket_secs = self.config.dedup_bucket.as_secs() as i64;
        let (bucket_start, bucket_end) =
            bucket_bounds(occurred_at, bucket_secs);

        if let Some(existing) = self
            .violations
            .find_in_bucket(rule.id, &ctx.user_name, bucket_start, bucket_end)
            .await?
        {
            self.violations
                .merge(existing.id, confidence_score, &draft.details)
                .await?;
            debug!(rule = %rule.name, user = %ctx.user_name, "violation merged into bucket");
            return Ok(());
        }

        let violation = RuleViolation {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            user_name: ctx.user_name.clone(),
            severity: draft.severity,
            message: draft.message,
            details: draft.details,
            confidence_score,
            occurred_at,
        };
        self.violations.insert(&violation).await?;
        info!(
            rule = %rule.name,
            user = %violation.user_name,
            severity = %violation.severity,
            confidence = violation.confidence_score,
            "violation recorded"
        );

        let channel_ids: Vec<Uuid> = self
            .channels
            .list_enabled()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        if !channel_ids.is_empty() {
            self.queue.enqueue(violation.id, &channel_ids).await?;
        }
        Ok(())
    }

    async fn build_context(
        &self,
        user: &str,
        stream: Option<ActiveStream>,
    ) -> Result<EvaluationContext> {
        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.history_window)
            .unwrap_or_else(|_| ChronoDuration::hours(24));

        let user_streams = self.active.for_user(user);
        let recent_history =
            self.history.recent_for_user(user, now - window).await?;
        let known_devices: HashSet<(String, String)> = self
            .history
            .devices_for_user(user)
            .await?
            .into_iter()
            .collect();
        let household = self.household.list_for_user(user).await?;

        let current_geo = match &stream {
            Some(s) if !s.ip_address.is_empty() => {
                Some(self.geo.lookup(&s.ip_address).await?)
            }
            _ => None,
        };

        // Previous session: newest history entry that is not the trigger.
        let previous = match &stream {
            Some(s) => recent_history
                .iter()
                .find(|entry| entry.session_id != s.session_id),
            None => recent_history.first(),
        };
        let (previous_geo, previous_seen_at) = match previous {
            Some(entry) if !entry.ip_address.is_empty() => (
                Some(self.geo.lookup(&entry.ip_address).await?),
                Some(entry.stopped_at),
            ),
            Some(entry) => (None, Some(entry.stopped_at)),
            None => (None, None),
        };

        let mut stream_geos: HashMap<String, GeoResult> = HashMap::new();
        for active in &user_streams {
            if active.ip_address.is_empty()
                || stream_geos.contains_key(&active.ip_address)
            {
                continue;
            }
            let geo = self.geo.lookup(&active.ip_address).await?;
            stream_geos.insert(active.ip_address.clone(), geo);
        }

        Ok(EvaluationContext {
            user_name: user.to_string(),
            stream,
            user_streams,
            recent_history,
            known_devices,
            household,
            current_geo,
            previous_geo,
            previous_seen_at,
            stream_geos,
            now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    use crate::database::ports::GeoCacheRepository;
    use crate::geo::provider::GeoProvider;
    use vigil_model::{
        NotificationChannel, PendingNotification, RuleType, Severity,
    };

    #[test]
    fn bucket_bounds_floor_to_bucket() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 42).unwrap();
        let (start, end) = bucket_bounds(at, 60);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn zero_bucket_clamps_to_one_second() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 42).unwrap();
        let (start, end) = bucket_bounds(at, 0);
        assert_eq!(end - start, ChronoDuration::seconds(1));
    }

    #[derive(Default)]
    struct FakeViolations {
        inserted: Mutex<Vec<RuleViolation>>,
        merged: Mutex<Vec<(Uuid, f64, Map<String, Value>)>>,
    }

    #[async_trait]
    impl ViolationRepository for FakeViolations {
        async fn insert(&self, violation: &RuleViolation) -> Result<()> {
            self.inserted.lock().push(violation.clone());
            Ok(())
        }

        async fn find_in_bucket(
            &self,
            rule_id: Uuid,
            user_name: &str,
            bucket_start: DateTime<Utc>,
            bucket_end: DateTime<Utc>,
        ) -> Result<Option<RuleViolation>> {
            Ok(self
                .inserted
                .lock()
                .iter()
                .find(|v| {
                    v.rule_id == rule_id
                        && v.user_name == user_name
                        && v.occurred_at >= bucket_start
                        && v.occurred_at < bucket_end
                })
                .cloned())
        }

        async fn merge(
            &self,
            id: Uuid,
            confidence_score: f64,
            details: &Map<String, Value>,
        ) -> Result<()> {
            self.merged.lock().push((id, confidence_score, details.clone()));
            Ok(())
        }

        async fn list(
            &self,
            _page: u32,
            _per_page: u32,
            _user_name: Option<&str>,
        ) -> Result<crate::database::ports::ViolationPage> {
            unimplemented!()
        }

        async fn get(&self, _id: Uuid) -> Result<Option<RuleViolation>> {
            Ok(None)
        }

        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }

        async fn count_since(&self, _since: DateTime<Utc>) -> Result<i64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct FakeRules {
        rules: Vec<Rule>,
    }

    #[async_trait]
    impl SharingRuleRepository for FakeRules {
        async fn create(&self, _rule: &Rule) -> Result<()> {
            Ok(())
        }
        async fn update(&self, _rule: &Rule) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _id: Uuid) -> Result<Option<Rule>> {
            Ok(None)
        }
        async fn list(&self) -> Result<Vec<Rule>> {
            Ok(self.rules.clone())
        }
        async fn list_enabled(&self) -> Result<Vec<Rule>> {
            Ok(self.rules.clone())
        }
    }

    struct FakeHistory;

    #[async_trait]
    impl HistoryRepository for FakeHistory {
        async fn insert(&self, _entry: &WatchHistoryEntry) -> Result<bool> {
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

    struct FakeHousehold;

    #[async_trait]
    impl HouseholdRepository for FakeHousehold {
        async fn list_for_user(
            &self,
            _user_name: &str,
        ) -> Result<Vec<vigil_model::HouseholdLocation>> {
            Ok(Vec::new())
        }
        async fn list(&self) -> Result<Vec<vigil_model::HouseholdLocation>> {
            Ok(Vec::new())
        }
        async fn get_by_user_ip(
            &self,
            _user_name: &str,
            _ip: &str,
        ) -> Result<Option<vigil_model::HouseholdLocation>> {
            Ok(None)
        }
        async fn insert(
            &self,
            _location: &vigil_model::HouseholdLocation,
        ) -> Result<()> {
            Ok(())
        }
        async fn touch(
            &self,
            _id: Uuid,
            _session_count: i64,
            _last_seen: DateTime<Utc>,
        ) -> Result<()> {
            Ok(())
        }
        async fn set_trusted(&self, _id: Uuid, _trusted: bool) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn user_ip_groups(
            &self,
            _min_sessions: i64,
        ) -> Result<Vec<crate::database::ports::UserIpGroup>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeChannels {
        channels: Vec<NotificationChannel>,
    }

    #[async_trait]
    impl ChannelRepository for FakeChannels {
        async fn create(&self, _channel: &NotificationChannel) -> Result<()> {
            Ok(())
        }
        async fn update(&self, _channel: &NotificationChannel) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn get(
            &self,
            _id: Uuid,
        ) -> Result<Option<NotificationChannel>> {
            Ok(None)
        }
        async fn list(&self) -> Result<Vec<NotificationChannel>> {
            Ok(self.channels.clone())
        }
        async fn list_enabled(&self) -> Result<Vec<NotificationChannel>> {
            Ok(self.channels.clone())
        }
    }

    #[derive(Default)]
    struct FakeQueue {
        enqueued: Mutex<Vec<(Uuid, Vec<Uuid>)>>,
    }

    #[async_trait]
    impl NotificationQueueRepository for FakeQueue {
        async fn enqueue(
            &self,
            violation_id: Uuid,
            channel_ids: &[Uuid],
        ) -> Result<()> {
            self.enqueued
                .lock()
                .push((violation_id, channel_ids.to_vec()));
            Ok(())
        }
        async fn due_for_channel(
            &self,
            _channel_id: Uuid,
            _now: DateTime<Utc>,
            _limit: i64,
        ) -> Result<Vec<PendingNotification>> {
            Ok(Vec::new())
        }
        async fn mark_delivered(&self, _id: i64) -> Result<()> {
            Ok(())
        }
        async fn record_failure(
            &self,
            _id: i64,
            _error: &str,
            _next_attempt_at: DateTime<Utc>,
            _dead_letter: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct NullCache;

    #[async_trait]
    impl GeoCacheRepository for NullCache {
        async fn get_fresh(
            &self,
            _ip: &str,
            _ttl: Duration,
        ) -> Result<Option<GeoResult>> {
            Ok(None)
        }
        async fn upsert(&self, _result: &GeoResult) -> Result<()> {
            Ok(())
        }
    }

    struct NullProvider;

    #[async_trait]
    impl GeoProvider for NullProvider {
        async fn resolve(&self, ip: &str) -> Result<GeoResult> {
            Ok(GeoResult {
                ip: ip.to_string(),
                ..Default::default()
            })
        }
    }

    fn engine(
        violations: Arc<FakeViolations>,
        queue: Arc<FakeQueue>,
        channels: Vec<NotificationChannel>,
    ) -> RuleEngine {
        RuleEngine::new(
            Arc::new(FakeRules::default()),
            violations,
            Arc::new(FakeHistory),
            Arc::new(FakeHousehold),
            Arc::new(FakeChannels { channels }),
            queue,
            Arc::new(GeoService::new(
                Arc::new(NullCache),
                Arc::new(NullProvider),
                Duration::from_secs(60),
            )),
            ActiveSessions::default(),
            RulesConfig::default(),
        )
    }

    fn rule() -> Rule {
        Rule {
            id: Uuid::new_v4(),
            name: "limit".into(),
            rule_type: RuleType::ConcurrentStreams,
            config: json!({}),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    fn ctx(user: &str) -> EvaluationContext {
        EvaluationContext {
            user_name: user.to_string(),
            stream: None,
            user_streams: Vec::new(),
            recent_history: Vec::new(),
            known_devices: HashSet::new(),
            household: Vec::new(),
            current_geo: None,
            previous_geo: None,
            previous_seen_at: None,
            stream_geos: HashMap::new(),
            now: Utc::now(),
        }
    }

    fn draft() -> ViolationDraft {
        ViolationDraft::new(Severity::Warning, "too many streams")
            .detail("stream_count", 4)
            .signal(vigil_model::Signal::boolean("over_limit", 1.0, true))
    }

    #[tokio::test]
    async fn duplicate_in_bucket_merges() {
        let violations = Arc::new(FakeViolations::default());
        let queue = Arc::new(FakeQueue::default());
        let engine = engine(violations.clone(), queue.clone(), Vec::new());
        let rule = rule();
        let ctx = ctx("alice");

        engine.record(&rule, &ctx, draft()).await.unwrap();
        engine.record(&rule, &ctx, draft()).await.unwrap();

        assert_eq!(violations.inserted.lock().len(), 1);
        assert_eq!(violations.merged.lock().len(), 1);
    }

    #[tokio::test]
    async fn different_users_do_not_collapse() {
        let violations = Arc::new(FakeViolations::default());
        let queue = Arc::new(FakeQueue::default());
        let engine = engine(violations.clone(), queue, Vec::new());
        let rule = rule();

        engine.record(&rule, &ctx("alice"), draft()).await.unwrap();
        engine.record(&rule, &ctx("bob"), draft()).await.unwrap();

        assert_eq!(violations.inserted.lock().len(), 2);
        assert!(violations.merged.lock().is_empty());
    }

    #[tokio::test]
    async fn new_violations_enqueue_notifications() {
        let violations = Arc::new(FakeViolations::default());
        let queue = Arc::new(FakeQueue::default());
        let channel = NotificationChannel {
            id: Uuid::new_v4(),
            name: "ops".into(),
            kind: vigil_model::ChannelKind::Webhook,
            config: json!({ "url": "https://example.com/hook" }),
            enabled: true,
            created_at: Utc::now(),
        };
        let engine =
            engine(violations.clone(), queue.clone(), vec![channel.clone()]);
        let rule = rule();
        let ctx = ctx("alice");

        engine.record(&rule, &ctx, draft()).await.unwrap();
        // The merged duplicate must not redeliver.
        engine.record(&rule, &ctx, draft()).await.unwrap();

        let enqueued = queue.enqueued.lock();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].1, vec![channel.id]);
    }
}
