mod geo;
mod history;
mod library_items;
mod maintenance;
mod notify;
mod rules;
mod servers;
mod snapshots;

pub use geo::{PostgresGeoCacheRepository, PostgresHouseholdRepository};
pub use history::PostgresHistoryRepository;
pub use library_items::PostgresLibraryItemRepository;
pub use maintenance::PostgresMaintenanceRepository;
pub use notify::{
    PostgresChannelRepository, PostgresNotificationQueueRepository,
};
pub use rules::{PostgresSharingRuleRepository, PostgresViolationRepository};
pub use servers::PostgresServerRepository;
pub use snapshots::PostgresSessionSnapshotRepository;
