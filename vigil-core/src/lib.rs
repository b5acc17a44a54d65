//! Core library for the Vigil monitor.
//!
//! The adapters normalise three vendor APIs into the canonical types of
//! `vigil-model`; the lifecycle turns polled snapshots into durable watch
//! history; the rule engine and maintenance engine react to both; the
//! persistence layer owns everything durable. [`Monitor`] wires it all
//! together under one cancellation root.

pub mod adapters;
pub mod database;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod maintenance;
pub mod monitor;
pub mod notify;
pub mod poller;
pub mod rules;

pub use adapters::{AdapterRegistry, MediaServerAdapter};
pub use database::Database;
pub use error::{MonitorError, Result};
pub use lifecycle::{ActiveSessions, SessionLifecycle};
pub use monitor::Monitor;
