use std::sync::Arc;

use vigil_core::Monitor;

/// Shared state for every handler: the monitor runtime and, through it,
/// the repositories and command surfaces.
#[derive(Clone, Debug)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

impl AppState {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self { monitor }
    }
}
