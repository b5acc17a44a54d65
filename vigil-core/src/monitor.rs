use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{adapter_for, AdapterRegistry};
use crate::database::Database;
use crate::error::{MonitorError, Result};
use crate::geo::household::household_calculate;
use crate::geo::provider::HttpGeoProvider;
use crate::geo::GeoService;
use crate::lifecycle::events::{event_bus, EventReceiver, EventSender};
use crate::lifecycle::{ActiveSessions, SessionLifecycle};
use crate::maintenance::{MaintenanceEvaluator, SyncManager};
use crate::notify::NotificationDispatcher;
use crate::poller::PollScheduler;
use crate::rules::RuleEngine;
use vigil_config::Config;
use vigil_model::Server;

/// Capacity of the poll-outcome channel into the lifecycle.
const OUTCOME_CHANNEL: usize = 1024;

/// Grace period for background tasks at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The assembled monitor runtime.
///
/// Owns the background tasks (pollers, lifecycle, rule engine, batch and
/// maintenance tickers, notification dispatcher) and hands the HTTP layer
/// read handles and command surfaces. Everything cancels from one root
/// token.
pub struct Monitor {
    db: Database,
    config: Config,
    client: Client,
    adapters: AdapterRegistry,
    active: ActiveSessions,
    events: EventSender,
    scheduler: PollScheduler,
    sync: Arc<SyncManager>,
    evaluator: Arc<MaintenanceEvaluator>,
    dispatcher: Arc<NotificationDispatcher>,
    geo: Arc<GeoService>,
    cancel: CancellationToken,
    lifecycle_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("active_sessions", &self.active.len())
            .finish()
    }
}

impl Monitor {
    /// Build and start the whole runtime: recover stale sessions, then
    /// spawn every background task.
    pub async fn start(db: Database, config: Config) -> Result<Arc<Self>> {
        let cancel = CancellationToken::new();
        let client = Client::builder()
            .timeout(config.polling.tick_deadline)
            .build()
            .map_err(|e| {
                MonitorError::internal(format!("http client: {e}"))
            })?;

        let geo = Arc::new(GeoService::new(
            db.geo_cache(),
            Arc::new(HttpGeoProvider::new(
                client.clone(),
                config.geo.provider_url.clone(),
            )),
            config.geo.cache_ttl,
        ));

        let events = event_bus(config.lifecycle.event_bus_capacity);
        let lifecycle = SessionLifecycle::new(
            db.history(),
            db.session_snapshots(),
            Some(geo.clone()),
            events.clone(),
            config.lifecycle.stop_after_misses,
        );
        let active = lifecycle.active_sessions();
        lifecycle.recover().await?;

        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL);
        let lifecycle_handle =
            tokio::spawn(lifecycle.run(outcome_rx, cancel.clone()));

        let adapters = AdapterRegistry::default();
        let scheduler = PollScheduler::new(
            config.polling.clone(),
            outcome_tx,
            cancel.clone(),
        );

        let sync = SyncManager::new(
            db.library_items(),
            adapters.clone(),
            config.maintenance.sync_workers,
            cancel.clone(),
        );
        let evaluator = Arc::new(MaintenanceEvaluator::new(
            db.maintenance(),
            db.library_items(),
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            db.notification_queue(),
            db.channels(),
            db.violations(),
            db.sharing_rules(),
            client.clone(),
            config.notify.clone(),
        ));
        let engine = Arc::new(RuleEngine::new(
            db.sharing_rules(),
            db.violations(),
            db.history(),
            db.household(),
            db.channels(),
            db.notification_queue(),
            geo.clone(),
            active.clone(),
            config.rules.clone(),
        ));

        let monitor = Arc::new(Self {
            db,
            config,
            client,
            adapters,
            active,
            events,
            scheduler,
            sync,
            evaluator,
            dispatcher,
            geo,
            cancel,
            lifecycle_handle: parking_lot::Mutex::new(Some(lifecycle_handle)),
        });

        for server in monitor.db.servers().list_enabled().await? {
            monitor.attach_server(&server);
        }

        tokio::spawn(
            engine
                .clone()
                .run(monitor.events.subscribe(), monitor.cancel.clone()),
        );
        tokio::spawn(
            monitor
                .dispatcher
                .clone()
                .run(monitor.cancel.clone()),
        );
        monitor.spawn_batch_ticker(engine);
        monitor.spawn_maintenance_ticker();

        info!("monitor runtime started");
        Ok(monitor)
    }

    fn spawn_batch_ticker(self: &Arc<Self>, engine: Arc<RuleEngine>) {
        let cancel = self.cancel.clone();
        let interval = self.config.rules.batch_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = engine.run_batch_once().await {
                    warn!("batch rule pass failed: {e}");
                }
            }
        });
    }

    fn spawn_maintenance_ticker(self: &Arc<Self>) {
        let Some(interval) = self.config.maintenance.evaluate_interval else {
            return;
        };
        let cancel = self.cancel.clone();
        let evaluator = self.evaluator.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = evaluator.evaluate_all().await {
                    warn!("maintenance evaluation pass failed: {e}");
                }
            }
        });
    }

    /// Register (or refresh) a server: adapter plus poll ticker.
    pub fn attach_server(&self, server: &Server) {
        let adapter = adapter_for(
            server,
            self.client.clone(),
            self.config.polling.requests_per_second,
        );
        self.adapters.insert(server.id, adapter.clone());
        if server.enabled {
            self.scheduler.start_server(server, adapter);
        } else {
            self.scheduler.stop_server(&server.id);
        }
    }

    /// Drop a deleted server's ticker and adapter.
    pub fn detach_server(&self, server_id: &Uuid) {
        self.scheduler.stop_server(server_id);
        self.adapters.remove(server_id);
    }

    /// Reachability check without touching the registry.
    pub async fn test_server(&self, server: &Server) -> Result<()> {
        let adapter = adapter_for(
            server,
            self.client.clone(),
            self.config.polling.requests_per_second,
        );
        adapter.ping().await
    }

    /// Pull vendor history into the store. Returns how many entries were
    /// new; replays dedup to no-ops.
    pub async fn import_history(
        &self,
        server_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let adapter = self.adapters.get(&server_id).ok_or_else(|| {
            MonitorError::not_found(format!("no adapter for server {server_id}"))
        })?;
        let entries = adapter.list_history(since).await?;
        let history = self.db.history();
        let mut inserted = 0;
        for entry in &entries {
            if history.insert(entry).await? {
                inserted += 1;
            }
        }
        info!(
            %server_id,
            fetched = entries.len(),
            inserted,
            "history import finished"
        );
        Ok(inserted)
    }

    pub async fn recalculate_household(&self) -> Result<usize> {
        household_calculate(
            self.db.household(),
            &self.geo,
            self.config.geo.household_min_sessions,
        )
        .await
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_sessions(&self) -> ActiveSessions {
        self.active.clone()
    }

    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn adapters(&self) -> AdapterRegistry {
        self.adapters.clone()
    }

    pub fn sync_manager(&self) -> Arc<SyncManager> {
        self.sync.clone()
    }

    pub fn evaluator(&self) -> Arc<MaintenanceEvaluator> {
        self.evaluator.clone()
    }

    pub fn dispatcher(&self) -> Arc<NotificationDispatcher> {
        self.dispatcher.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel everything and wait out the grace period. The lifecycle task
    /// flushes active sessions to history before it returns.
    pub async fn shutdown(&self) {
        info!("monitor shutting down");
        self.cancel.cancel();
        self.scheduler.shutdown(SHUTDOWN_GRACE).await;
        let handle = self.lifecycle_handle.lock().take();
        if let Some(handle) = handle
            && timeout(SHUTDOWN_GRACE, handle).await.is_err()
        {
            warn!("lifecycle did not flush within grace period");
        }
    }
}
