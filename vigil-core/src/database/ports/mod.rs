mod geo;
mod history;
mod library_items;
mod maintenance;
mod notify;
mod rules;
mod servers;
mod snapshots;

pub use geo::{GeoCacheRepository, HouseholdRepository, UserIpGroup};
pub use history::HistoryRepository;
pub use library_items::LibraryItemRepository;
pub use maintenance::{CandidatePage, CandidateRow, MaintenanceRepository};
pub use notify::{ChannelRepository, NotificationQueueRepository};
pub use rules::{SharingRuleRepository, ViolationPage, ViolationRepository};
pub use servers::ServerRepository;
pub use snapshots::{SessionSnapshot, SessionSnapshotRepository};
