use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ModelError;

/// The algorithmic kind of a sharing-abuse rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    ImpossibleTravel,
    ConcurrentStreams,
    SimultaneousLocations,
    DeviceVelocity,
    GeoRestriction,
    NewDevice,
    NewLocation,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::ImpossibleTravel => "impossible_travel",
            RuleType::ConcurrentStreams => "concurrent_streams",
            RuleType::SimultaneousLocations => "simultaneous_locations",
            RuleType::DeviceVelocity => "device_velocity",
            RuleType::GeoRestriction => "geo_restriction",
            RuleType::NewDevice => "new_device",
            RuleType::NewLocation => "new_location",
        }
    }

    /// Whether the type is evaluated on every session event. Batch-only
    /// types run on the batch ticker over accumulated history instead.
    pub fn is_realtime(&self) -> bool {
        !matches!(self, RuleType::DeviceVelocity)
    }

    pub const ALL: [RuleType; 7] = [
        RuleType::ImpossibleTravel,
        RuleType::ConcurrentStreams,
        RuleType::SimultaneousLocations,
        RuleType::DeviceVelocity,
        RuleType::GeoRestriction,
        RuleType::NewDevice,
        RuleType::NewLocation,
    ];
}

impl Display for RuleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "impossible_travel" => Ok(RuleType::ImpossibleTravel),
            "concurrent_streams" => Ok(RuleType::ConcurrentStreams),
            "simultaneous_locations" => Ok(RuleType::SimultaneousLocations),
            "device_velocity" => Ok(RuleType::DeviceVelocity),
            "geo_restriction" => Ok(RuleType::GeoRestriction),
            "new_device" => Ok(RuleType::NewDevice),
            "new_location" => Ok(RuleType::NewLocation),
            other => Err(ModelError::UnknownVariant {
                kind: "rule type",
                value: other.to_string(),
            }),
        }
    }
}

/// Violation severity, ordered `info < warning < critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(ModelError::UnknownVariant {
                kind: "severity",
                value: other.to_string(),
            }),
        }
    }
}

/// Configuration for `impossible_travel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ImpossibleTravelConfig {
    pub max_speed_km_h: f64,
    pub min_distance_km: f64,
    pub time_window_hours: f64,
}

impl Default for ImpossibleTravelConfig {
    fn default() -> Self {
        Self {
            max_speed_km_h: 800.0,
            min_distance_km: 100.0,
            time_window_hours: 12.0,
        }
    }
}

/// Configuration for `concurrent_streams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ConcurrentStreamsConfig {
    pub max_streams: u32,
    pub exempt_household: bool,
    /// Count all paused sessions as a single unit.
    pub collapse_paused: bool,
}

impl Default for ConcurrentStreamsConfig {
    fn default() -> Self {
        Self {
            max_streams: 3,
            exempt_household: false,
            collapse_paused: false,
        }
    }
}

/// Configuration for `simultaneous_locations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimultaneousLocationsConfig {
    pub min_distance_km: f64,
}

impl Default for SimultaneousLocationsConfig {
    fn default() -> Self {
        Self {
            min_distance_km: 150.0,
        }
    }
}

/// Configuration for `device_velocity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeviceVelocityConfig {
    pub max_devices_per_hour: u32,
    pub time_window_hours: f64,
}

impl Default for DeviceVelocityConfig {
    fn default() -> Self {
        Self {
            max_devices_per_hour: 3,
            time_window_hours: 1.0,
        }
    }
}

/// Configuration for `geo_restriction`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GeoRestrictionConfig {
    /// When non-empty, any country outside the list violates.
    pub allowed_countries: Vec<String>,
    /// Checked only when `allowed_countries` is empty.
    pub blocked_countries: Vec<String>,
}

/// Configuration for `new_device`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NewDeviceConfig {
    pub notify_only: bool,
}

/// Configuration for `new_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NewLocationConfig {
    pub min_distance_km: f64,
    /// Distance past which the violation escalates from info to warning.
    pub severity_threshold_km: f64,
}

impl Default for NewLocationConfig {
    fn default() -> Self {
        Self {
            min_distance_km: 50.0,
            severity_threshold_km: 500.0,
        }
    }
}

/// Strictly parse `config` against the schema for `rule_type`.
pub fn validate_rule_config(
    rule_type: RuleType,
    config: &Value,
) -> Result<(), ModelError> {
    let result = match rule_type {
        RuleType::ImpossibleTravel => {
            serde_json::from_value::<ImpossibleTravelConfig>(config.clone())
                .map(drop)
        }
        RuleType::ConcurrentStreams => {
            serde_json::from_value::<ConcurrentStreamsConfig>(config.clone())
                .map(drop)
        }
        RuleType::SimultaneousLocations => serde_json::from_value::<
            SimultaneousLocationsConfig,
        >(config.clone())
        .map(drop),
        RuleType::DeviceVelocity => {
            serde_json::from_value::<DeviceVelocityConfig>(config.clone())
                .map(drop)
        }
        RuleType::GeoRestriction => {
            serde_json::from_value::<GeoRestrictionConfig>(config.clone())
                .map(drop)
        }
        RuleType::NewDevice => {
            serde_json::from_value::<NewDeviceConfig>(config.clone()).map(drop)
        }
        RuleType::NewLocation => {
            serde_json::from_value::<NewLocationConfig>(config.clone())
                .map(drop)
        }
    };
    result.map_err(|e| {
        ModelError::validation(format!("invalid {rule_type} config: {e}"))
    })
}

/// User-defined sharing-abuse rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    /// Type-fixed configuration object, validated on save.
    pub config: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(ModelError::validation(
                "rule name must be 1..=255 characters",
            ));
        }
        validate_rule_config(self.rule_type, &self.config)
    }
}

/// One weighted, valued input into confidence scoring.
///
/// Values are coerced to `[0, 100]` by the engine: numbers clamp, booleans
/// become 100/0, anything else is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub weight: f64,
    pub value: Value,
}

impl Signal {
    pub fn numeric(name: impl Into<String>, weight: f64, value: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            value: Value::from(value),
        }
    }

    pub fn boolean(name: impl Into<String>, weight: f64, value: bool) -> Self {
        Self {
            name: name.into(),
            weight,
            value: Value::from(value),
        }
    }
}

/// A persisted event indicating a rule predicate fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleViolation {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub user_name: String,
    pub severity: Severity,
    pub message: String,
    pub details: Map<String, Value>,
    pub confidence_score: f64,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn realtime_split() {
        assert!(RuleType::ImpossibleTravel.is_realtime());
        assert!(!RuleType::DeviceVelocity.is_realtime());
    }

    #[test]
    fn config_unknown_fields_rejected() {
        let err = validate_rule_config(
            RuleType::ConcurrentStreams,
            &json!({ "max_streams": 2, "bogus": 1 }),
        );
        assert!(err.is_err());
    }

    #[test]
    fn config_defaults_accepted() {
        assert!(validate_rule_config(RuleType::ImpossibleTravel, &json!({}))
            .is_ok());
    }
}
