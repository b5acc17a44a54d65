use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use vigil_model::{
    ActiveStream, GeoResult, HouseholdLocation, WatchHistoryEntry,
};

/// Everything an evaluator may look at for one event (or one batch pass).
///
/// Real-time evaluations carry the triggering stream; batch evaluations
/// carry `stream = None` and evaluators that need a live session skip.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub user_name: String,
    pub stream: Option<ActiveStream>,
    /// Every active stream of the user across all servers, the trigger
    /// included.
    pub user_streams: Vec<ActiveStream>,
    /// History inside the configured window, newest first.
    pub recent_history: Vec<WatchHistoryEntry>,
    /// Every `(player, platform)` ever observed for the user.
    pub known_devices: HashSet<(String, String)>,
    pub household: Vec<HouseholdLocation>,
    /// Geo of the triggering stream's IP.
    pub current_geo: Option<GeoResult>,
    /// Geo of the user's previous session, with when it ended.
    pub previous_geo: Option<GeoResult>,
    pub previous_seen_at: Option<DateTime<Utc>>,
    /// Geo per distinct IP across `user_streams`.
    pub stream_geos: HashMap<String, GeoResult>,
    pub now: DateTime<Utc>,
}

impl EvaluationContext {
    pub fn time_since_last_seen(&self) -> Option<Duration> {
        self.previous_seen_at.map(|seen| self.now - seen)
    }

    /// Whether `ip` belongs to one of the user's trusted locations.
    pub fn is_household_ip(&self, ip: &str) -> bool {
        self.household
            .iter()
            .any(|location| location.trusted && location.matches_ip(ip))
    }

    /// Distance in km from `point` to the nearest trusted location that
    /// carries coordinates.
    pub fn distance_to_nearest_household(
        &self,
        point: (f64, f64),
    ) -> Option<f64> {
        self.household
            .iter()
            .filter(|location| location.trusted)
            .filter_map(|location| location.coordinates())
            .map(|coords| crate::geo::haversine_km(point, coords))
            .min_by(|a, b| a.total_cmp(b))
    }
}
