//! Convenience re-exports for downstream crates.

pub use crate::error::{ModelError, Result as ModelResult};
pub use crate::geo::{GeoResult, HouseholdLocation};
pub use crate::history::{HistoryPage, HistoryQuery, SortOrder, WatchHistoryEntry};
pub use crate::ids::SessionKey;
pub use crate::library::{
    ExternalIds, ItemDetails, Library, LibraryItemCache, MediaType,
};
pub use crate::maintenance::{
    BulkDeleteFailure, BulkDeleteProgress, BulkDeleteResult, CriterionType,
    MaintenanceCandidate, MaintenanceExclusion, MaintenanceRule,
    RuleLibraryScope, SyncPhase, SyncProgress,
};
pub use crate::notify::{
    ChannelKind, DeliveryState, NotificationChannel, NotificationPayload,
    PendingNotification,
};
pub use crate::resolution::parse_resolution;
pub use crate::rules::{
    Rule, RuleType, RuleViolation, Severity, Signal,
};
pub use crate::server::{Server, ServerKind};
pub use crate::stream::{ActiveStream, SessionState, TranscodeInfo};
