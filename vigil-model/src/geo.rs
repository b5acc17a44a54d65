use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geographic lookup result for one IP address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
    pub ip: String,
    pub city: Option<String>,
    pub country: Option<String>,
    pub isp: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// True for private/empty addresses that never leave the LAN.
    pub private: bool,
}

impl GeoResult {
    /// Sentinel for private or empty addresses; never sent to a provider.
    pub fn private_sentinel(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            private: true,
            ..Default::default()
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// A trusted-location record for one user.
///
/// Auto-learned when enough sessions are observed from the same IP, or
/// created by hand through the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseholdLocation {
    pub id: Uuid,
    pub user_name: String,
    pub ip_address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub session_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub auto_learned: bool,
    pub trusted: bool,
}

impl HouseholdLocation {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    /// Whether `ip` matches this location's IP anchor.
    pub fn matches_ip(&self, ip: &str) -> bool {
        self.ip_address.as_deref() == Some(ip)
    }
}
