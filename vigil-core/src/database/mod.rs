pub mod ports;
pub mod repositories;

use std::sync::Arc;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;
use ports::{
    ChannelRepository, GeoCacheRepository, HistoryRepository,
    HouseholdRepository, LibraryItemRepository, MaintenanceRepository,
    NotificationQueueRepository, ServerRepository, SessionSnapshotRepository,
    SharingRuleRepository, ViolationRepository,
};
use repositories::{
    PostgresChannelRepository, PostgresGeoCacheRepository,
    PostgresHistoryRepository, PostgresHouseholdRepository,
    PostgresLibraryItemRepository, PostgresMaintenanceRepository,
    PostgresNotificationQueueRepository, PostgresServerRepository,
    PostgresSessionSnapshotRepository, PostgresSharingRuleRepository,
    PostgresViolationRepository,
};

/// The sole authority for durable state.
///
/// Every component reaches storage through the typed repository ports held
/// here; mutations happen in short transactions owned by the repositories.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    servers: Arc<PostgresServerRepository>,
    history: Arc<PostgresHistoryRepository>,
    library_items: Arc<PostgresLibraryItemRepository>,
    maintenance: Arc<PostgresMaintenanceRepository>,
    sharing_rules: Arc<PostgresSharingRuleRepository>,
    violations: Arc<PostgresViolationRepository>,
    household: Arc<PostgresHouseholdRepository>,
    channels: Arc<PostgresChannelRepository>,
    notification_queue: Arc<PostgresNotificationQueueRepository>,
    geo_cache: Arc<PostgresGeoCacheRepository>,
    session_snapshots: Arc<PostgresSessionSnapshotRepository>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl Database {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            servers: Arc::new(PostgresServerRepository::new(pool.clone())),
            history: Arc::new(PostgresHistoryRepository::new(pool.clone())),
            library_items: Arc::new(PostgresLibraryItemRepository::new(
                pool.clone(),
            )),
            maintenance: Arc::new(PostgresMaintenanceRepository::new(
                pool.clone(),
            )),
            sharing_rules: Arc::new(PostgresSharingRuleRepository::new(
                pool.clone(),
            )),
            violations: Arc::new(PostgresViolationRepository::new(
                pool.clone(),
            )),
            household: Arc::new(PostgresHouseholdRepository::new(pool.clone())),
            channels: Arc::new(PostgresChannelRepository::new(pool.clone())),
            notification_queue: Arc::new(
                PostgresNotificationQueueRepository::new(pool.clone()),
            ),
            geo_cache: Arc::new(PostgresGeoCacheRepository::new(pool.clone())),
            session_snapshots: Arc::new(
                PostgresSessionSnapshotRepository::new(pool.clone()),
            ),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn servers(&self) -> Arc<dyn ServerRepository> {
        self.servers.clone()
    }

    pub fn history(&self) -> Arc<dyn HistoryRepository> {
        self.history.clone()
    }

    pub fn library_items(&self) -> Arc<dyn LibraryItemRepository> {
        self.library_items.clone()
    }

    pub fn maintenance(&self) -> Arc<dyn MaintenanceRepository> {
        self.maintenance.clone()
    }

    pub fn sharing_rules(&self) -> Arc<dyn SharingRuleRepository> {
        self.sharing_rules.clone()
    }

    pub fn violations(&self) -> Arc<dyn ViolationRepository> {
        self.violations.clone()
    }

    pub fn household(&self) -> Arc<dyn HouseholdRepository> {
        self.household.clone()
    }

    pub fn channels(&self) -> Arc<dyn ChannelRepository> {
        self.channels.clone()
    }

    pub fn notification_queue(&self) -> Arc<dyn NotificationQueueRepository> {
        self.notification_queue.clone()
    }

    pub fn geo_cache(&self) -> Arc<dyn GeoCacheRepository> {
        self.geo_cache.clone()
    }

    pub fn session_snapshots(&self) -> Arc<dyn SessionSnapshotRepository> {
        self.session_snapshots.clone()
    }
}
