//! Shared configuration library for Vigil.
//!
//! This crate centralizes config loading and validation for the monitor
//! binary so there is a single source of truth for defaults, managed keys,
//! and guard rails. The loader reads environment variables (the binary runs
//! `dotenvy` first, so a `.env` file works the same way).

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoadError, ConfigLoader};
pub use models::{
    Config, DatabaseConfig, GeoConfig, LifecycleConfig, MaintenanceConfig,
    NotifyConfig, PollingConfig, RulesConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
