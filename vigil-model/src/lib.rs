//! Core data model definitions shared across Vigil crates.
#![allow(missing_docs)]

pub mod error;
pub mod geo;
pub mod history;
pub mod ids;
pub mod library;
pub mod maintenance;
pub mod notify;
pub mod prelude;
pub mod resolution;
pub mod rules;
pub mod server;
pub mod stream;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use geo::{GeoResult, HouseholdLocation};
pub use history::{
    HistoryPage, HistoryQuery, SortOrder, WatchHistoryEntry,
};
pub use ids::SessionKey;
pub use library::{
    ExternalIds, ItemDetails, Library, LibraryItemCache, MediaType,
};
pub use maintenance::{
    BulkDeleteFailure, BulkDeleteProgress, BulkDeleteResult, CriterionType,
    LargeFilesParams, LowResolutionParams, MaintenanceCandidate,
    MaintenanceExclusion, MaintenanceRule, RuleLibraryScope, SyncPhase,
    SyncProgress, UnwatchedMovieParams, UnwatchedTvParams,
};
pub use notify::{
    ChannelKind, DeliveryState, DiscordConfig, NotificationChannel,
    NotificationPayload, NtfyConfig, PendingNotification, PushoverConfig,
    WebhookConfig,
};
pub use resolution::parse_resolution;
pub use rules::{
    ConcurrentStreamsConfig, DeviceVelocityConfig, GeoRestrictionConfig,
    ImpossibleTravelConfig, NewDeviceConfig, NewLocationConfig, Rule,
    RuleType, RuleViolation, Severity, Signal, SimultaneousLocationsConfig,
};
pub use server::{Server, ServerKind};
pub use stream::{ActiveStream, SessionState, TranscodeInfo};
