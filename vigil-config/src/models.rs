use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub polling: PollingConfig,
    pub lifecycle: LifecycleConfig,
    pub rules: RulesConfig,
    pub maintenance: MaintenanceConfig,
    pub geo: GeoConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8279,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Period of the per-server session ticker.
    pub interval: Duration,
    /// Per-tick adapter deadline.
    pub tick_deadline: Duration,
    /// Backoff cap after consecutive failures.
    pub max_backoff: Duration,
    /// Adapter rate limit, requests per second per server.
    pub requests_per_second: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            tick_deadline: Duration::from_secs(8),
            max_backoff: Duration::from_secs(60),
            requests_per_second: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Consecutive successful polls a session must be absent from before it
    /// is declared stopped.
    pub stop_after_misses: u32,
    /// Capacity of the session event bus.
    pub event_bus_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_after_misses: 2,
            event_bus_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RulesConfig {
    /// History window handed to the evaluation context.
    pub history_window: Duration,
    /// Violation dedup bucket; guard-railed to never be zero.
    pub dedup_bucket: Duration,
    /// Bound on concurrently evaluated session events.
    pub worker_pool: usize,
    /// Period of the batch-rule ticker.
    pub batch_interval: Duration,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            history_window: Duration::from_secs(24 * 3600),
            dedup_bucket: Duration::from_secs(60),
            worker_pool: 8,
            batch_interval: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Bound on concurrently running library syncs.
    pub sync_workers: usize,
    /// Period of the maintenance evaluation ticker. `None` disables it.
    pub evaluate_interval: Option<Duration>,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sync_workers: 4,
            evaluate_interval: Some(Duration::from_secs(6 * 3600)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Cache TTL for IP lookups.
    pub cache_ttl: Duration,
    /// HTTP lookup endpoint; `{ip}` is substituted.
    pub provider_url: String,
    /// Sessions from one IP before a household location is auto-learned.
    pub household_min_sessions: i64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30 * 24 * 3600),
            provider_url: "http://ip-api.com/json/{ip}".to_string(),
            household_min_sessions: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Delivery attempts before a notification dead-letters.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_base: Duration,
    /// Period of the retry sweep ticker.
    pub retry_interval: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base: Duration::from_secs(30),
            retry_interval: Duration::from_secs(60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            polling: PollingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            rules: RulesConfig::default(),
            maintenance: MaintenanceConfig::default(),
            geo: GeoConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}
