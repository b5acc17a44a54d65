use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::MediaServerAdapter;
use crate::lifecycle::PollOutcome;
use vigil_config::PollingConfig;
use vigil_model::Server;

/// Delay before a panicked ticker is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// One ticker per enabled server, feeding the lifecycle channel.
///
/// The scheduler is also the supervisor: a ticker that panics is restarted
/// after a delay, and the root cancellation stops every ticker before
/// `shutdown` returns.
pub struct PollScheduler {
    config: PollingConfig,
    outcomes: mpsc::Sender<PollOutcome>,
    cancel: CancellationToken,
    /// Per-server child tokens so one ticker can be stopped at runtime.
    servers: dashmap::DashMap<uuid::Uuid, CancellationToken>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PollScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollScheduler")
            .field("tickers", &self.servers.len())
            .finish()
    }
}

impl PollScheduler {
    pub fn new(
        config: PollingConfig,
        outcomes: mpsc::Sender<PollOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            outcomes,
            cancel,
            servers: dashmap::DashMap::new(),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the supervised ticker for one server, replacing a running one.
    pub fn start_server(
        &self,
        server: &Server,
        adapter: Arc<dyn MediaServerAdapter>,
    ) {
        let cancel = self.cancel.child_token();
        if let Some(previous) = self.servers.insert(server.id, cancel.clone())
        {
            previous.cancel();
        }

        let config = self.config.clone();
        let outcomes = self.outcomes.clone();
        let server_id = server.id;
        let server_name = server.name.clone();

        let handle = tokio::spawn(async move {
            loop {
                let ticker = tokio::spawn(poll_loop(
                    server_id,
                    server_name.clone(),
                    adapter.clone(),
                    config.clone(),
                    outcomes.clone(),
                    cancel.clone(),
                ));
                match ticker.await {
                    Ok(()) => return,
                    Err(join_err) if join_err.is_panic() => {
                        error!(
                            server = %server_name,
                            "poll ticker panicked, restarting in {RESTART_DELAY:?}"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(RESTART_DELAY) => {}
                        }
                    }
                    Err(_) => return,
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Stop one server's ticker, if running.
    pub fn stop_server(&self, server_id: &uuid::Uuid) {
        if let Some((_, token)) = self.servers.remove(server_id) {
            token.cancel();
        }
    }

    /// Cancel all tickers and wait up to `grace` for them to return.
    /// Stragglers are abandoned.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock());
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if timeout(grace, join_all).await.is_err() {
            warn!("poll tickers did not stop within grace period");
        }
    }
}

async fn poll_loop(
    server_id: uuid::Uuid,
    server_name: String,
    adapter: Arc<dyn MediaServerAdapter>,
    config: PollingConfig,
    outcomes: mpsc::Sender<PollOutcome>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;
    info!(server = %server_name, "poll ticker started");

    loop {
        let outcome = match timeout(
            config.tick_deadline,
            adapter.list_active_sessions(),
        )
        .await
        {
            Ok(Ok(streams)) => {
                failures = 0;
                PollOutcome::Sessions { server_id, streams }
            }
            Ok(Err(e)) => {
                failures = failures.saturating_add(1);
                warn!(server = %server_name, failures, "poll failed: {e}");
                PollOutcome::Failed { server_id }
            }
            Err(_) => {
                failures = failures.saturating_add(1);
                warn!(
                    server = %server_name,
                    failures,
                    "poll exceeded {:?} deadline",
                    config.tick_deadline
                );
                PollOutcome::Failed { server_id }
            }
        };

        if outcomes.send(outcome).await.is_err() {
            // Lifecycle is gone; nothing left to poll for.
            return;
        }

        let delay = backoff_delay(&config, failures);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(server = %server_name, "poll ticker stopped");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Poll interval under backoff: doubled per consecutive failure, capped.
fn backoff_delay(config: &PollingConfig, failures: u32) -> Duration {
    if failures == 0 {
        return config.interval;
    }
    let factor = 2u32.saturating_pow(failures.min(16) - 1);
    config
        .interval
        .saturating_mul(factor)
        .min(config.max_backoff)
        .max(config.interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::adapters::ItemBatch;
    use crate::error::{MonitorError, Result};
    use vigil_model::{
        ActiveStream, ItemDetails, Library, WatchHistoryEntry,
    };

    struct ScriptedAdapter {
        calls: AtomicUsize,
        script: Mutex<Vec<Result<Vec<ActiveStream>>>>,
    }

    impl ScriptedAdapter {
        fn new(script: Vec<Result<Vec<ActiveStream>>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl MediaServerAdapter for ScriptedAdapter {
        async fn list_active_sessions(&self) -> Result<Vec<ActiveStream>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok(Vec::new())
            } else {
                script.remove(0)
            }
        }

        async fn list_history(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> Result<Vec<WatchHistoryEntry>> {
            Ok(Vec::new())
        }

        async fn list_libraries(&self) -> Result<Vec<Library>> {
            Ok(Vec::new())
        }

        async fn list_library_items(
            &self,
            _library: &Library,
            _cursor: Option<String>,
        ) -> Result<ItemBatch> {
            Ok(ItemBatch {
                items: Vec::new(),
                next: None,
                total: Some(0),
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

    fn test_config() -> PollingConfig {
        PollingConfig {
            interval: Duration::from_millis(5),
            tick_deadline: Duration::from_millis(100),
            max_backoff: Duration::from_millis(40),
            requests_per_second: 100,
        }
    }

    fn server() -> Server {
        Server {
            id: uuid::Uuid::new_v4(),
            name: "test".into(),
            kind: vigil_model::ServerKind::Plex,
            url: "http://localhost".into(),
            api_key: "k".into(),
            machine_id: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = PollingConfig {
            interval: Duration::from_secs(5),
            tick_deadline: Duration::from_secs(8),
            max_backoff: Duration::from_secs(60),
            requests_per_second: 10,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn failures_produce_failed_outcomes_then_recover() {
        let adapter = ScriptedAdapter::new(vec![
            Err(MonitorError::transient("down")),
            Ok(Vec::new()),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let scheduler =
            PollScheduler::new(test_config(), tx, cancel.clone());
        scheduler.start_server(&server(), adapter.clone());

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PollOutcome::Failed { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, PollOutcome::Sessions { .. }));

        scheduler.shutdown(Duration::from_millis(200)).await;
        assert!(adapter.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_stops_tickers() {
        let adapter = ScriptedAdapter::new(vec![]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let scheduler =
            PollScheduler::new(test_config(), tx, cancel.clone());
        scheduler.start_server(&server(), adapter);

        let _ = rx.recv().await;
        scheduler.shutdown(Duration::from_millis(200)).await;

        // Channel drains whatever was in flight, then closes.
        while rx.try_recv().is_ok() {}
        assert!(rx.try_recv().is_err());
    }
}
