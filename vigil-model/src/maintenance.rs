use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ModelError;
use crate::library::MediaType;

/// The algorithmic kind of a maintenance rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionType {
    UnwatchedMovie,
    UnwatchedTvNone,
    LowResolution,
    LargeFiles,
}

impl CriterionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriterionType::UnwatchedMovie => "unwatched_movie",
            CriterionType::UnwatchedTvNone => "unwatched_tv_none",
            CriterionType::LowResolution => "low_resolution",
            CriterionType::LargeFiles => "large_files",
        }
    }
}

impl Display for CriterionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CriterionType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unwatched_movie" => Ok(CriterionType::UnwatchedMovie),
            "unwatched_tv_none" => Ok(CriterionType::UnwatchedTvNone),
            "low_resolution" => Ok(CriterionType::LowResolution),
            "large_files" => Ok(CriterionType::LargeFiles),
            other => Err(ModelError::UnknownVariant {
                kind: "criterion type",
                value: other.to_string(),
            }),
        }
    }
}

/// Parameters for `unwatched_movie`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UnwatchedMovieParams {
    pub days: u32,
}

impl Default for UnwatchedMovieParams {
    fn default() -> Self {
        Self { days: 90 }
    }
}

/// Parameters for `unwatched_tv_none`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct UnwatchedTvParams {
    pub days: u32,
}

impl Default for UnwatchedTvParams {
    fn default() -> Self {
        Self { days: 180 }
    }
}

/// Parameters for `low_resolution`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LowResolutionParams {
    pub max_height: u32,
}

impl Default for LowResolutionParams {
    fn default() -> Self {
        Self { max_height: 720 }
    }
}

/// Parameters for `large_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LargeFilesParams {
    pub min_size_gb: f64,
}

impl Default for LargeFilesParams {
    fn default() -> Self {
        Self { min_size_gb: 20.0 }
    }
}

impl LargeFilesParams {
    pub fn min_size_bytes(&self) -> i64 {
        (self.min_size_gb * 1024.0 * 1024.0 * 1024.0) as i64
    }
}

/// One `(server, library)` scope of a maintenance rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleLibraryScope {
    pub server_id: Uuid,
    pub library_id: String,
}

/// User-defined library maintenance rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRule {
    pub id: Uuid,
    pub name: String,
    pub criterion_type: CriterionType,
    pub media_type: MediaType,
    /// Criterion-typed parameter object; schema fixed per criterion and
    /// validated on save, not at evaluation time.
    pub parameters: Value,
    pub enabled: bool,
    pub libraries: Vec<RuleLibraryScope>,
    pub created_at: DateTime<Utc>,
}

impl MaintenanceRule {
    /// Save-time validation: name bounds, scope presence and uniqueness,
    /// and a strict parse of `parameters` against the criterion's schema
    /// (unknown fields rejected).
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(ModelError::validation(
                "rule name must be 1..=255 characters",
            ));
        }
        if self.libraries.is_empty() {
            return Err(ModelError::validation(
                "rule must target at least one library",
            ));
        }
        let mut seen = HashSet::new();
        for scope in &self.libraries {
            if !seen.insert((scope.server_id, scope.library_id.as_str())) {
                return Err(ModelError::validation(format!(
                    "duplicate library scope {}/{}",
                    scope.server_id, scope.library_id
                )));
            }
        }
        validate_parameters(self.criterion_type, &self.parameters)
    }
}

/// Strictly parse `parameters` against the schema for `criterion`.
pub fn validate_parameters(
    criterion: CriterionType,
    parameters: &Value,
) -> Result<(), ModelError> {
    let result = match criterion {
        CriterionType::UnwatchedMovie => {
            serde_json::from_value::<UnwatchedMovieParams>(parameters.clone())
                .map(drop)
        }
        CriterionType::UnwatchedTvNone => {
            serde_json::from_value::<UnwatchedTvParams>(parameters.clone())
                .map(drop)
        }
        CriterionType::LowResolution => {
            serde_json::from_value::<LowResolutionParams>(parameters.clone())
                .map(drop)
        }
        CriterionType::LargeFiles => {
            serde_json::from_value::<LargeFilesParams>(parameters.clone())
                .map(drop)
        }
    };
    result.map_err(|e| {
        ModelError::validation(format!("invalid {criterion} parameters: {e}"))
    })
}

/// One item flagged by a maintenance rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceCandidate {
    pub rule_id: Uuid,
    pub library_item_id: i64,
    pub reason: String,
    pub computed_at: DateTime<Utc>,
    /// Number of other enabled servers whose cache holds the same item by
    /// external id.
    pub cross_server_count: i64,
}

/// User-marked `(rule, item)` pair that must never surface as a candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceExclusion {
    pub rule_id: Uuid,
    pub library_item_id: i64,
    pub excluded_by: String,
    pub excluded_at: DateTime<Utc>,
}

/// Phase of a running library sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Items,
    History,
    Done,
    Error,
}

/// Observable progress of one `(server, library)` sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgress {
    pub server_id: Uuid,
    pub library_id: String,
    pub phase: SyncPhase,
    pub current: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Per-item failure surfaced by a bulk delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteFailure {
    pub title: String,
    pub error: String,
}

/// Running state emitted after each item of a bulk delete completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteProgress {
    pub current: u64,
    pub total: u64,
    pub title: String,
    pub status: String,
    pub deleted: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total_size: i64,
}

/// Final accounting of a bulk delete. `deleted + failed + skipped = total`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkDeleteResult {
    pub total: u64,
    pub deleted: u64,
    pub failed: u64,
    pub skipped: u64,
    pub total_size: i64,
    pub failures: Vec<BulkDeleteFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(parameters: Value) -> MaintenanceRule {
        MaintenanceRule {
            id: Uuid::new_v4(),
            name: "old movies".into(),
            criterion_type: CriterionType::UnwatchedMovie,
            media_type: MediaType::Movie,
            parameters,
            enabled: true,
            libraries: vec![RuleLibraryScope {
                server_id: Uuid::new_v4(),
                library_id: "1".into(),
            }],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_parameter_fields_rejected() {
        let rule = rule(json!({ "days": 30, "surprise": true }));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn defaults_fill_missing_parameters() {
        let rule = rule(json!({}));
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn duplicate_scopes_rejected() {
        let mut rule = rule(json!({ "days": 30 }));
        rule.libraries.push(rule.libraries[0].clone());
        assert!(rule.validate().is_err());
    }

    #[test]
    fn empty_name_rejected() {
        let mut rule = rule(json!({}));
        rule.name.clear();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn large_files_threshold_in_bytes() {
        let params = LargeFilesParams { min_size_gb: 2.0 };
        assert_eq!(params.min_size_bytes(), 2 * 1024 * 1024 * 1024);
    }
}
