use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_model::{Rule, RuleType};

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn empty_object() -> Value {
    json!({})
}

fn default_true() -> bool {
    true
}

/// `GET /api/rules`
pub async fn list_rules(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Rule>>> {
    Ok(Json(
        state.monitor.database().sharing_rules().list().await?,
    ))
}

/// `POST /api/rules` — config validated against the type's schema.
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> AppResult<(StatusCode, Json<Rule>)> {
    let rule = Rule {
        id: Uuid::new_v4(),
        name: request.name,
        rule_type: request.rule_type,
        config: request.config,
        enabled: request.enabled,
        created_at: Utc::now(),
    };
    rule.validate()?;
    state
        .monitor
        .database()
        .sharing_rules()
        .create(&rule)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `PUT /api/rules/{id}`
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateRuleRequest>,
) -> AppResult<Json<Rule>> {
    let repo = state.monitor.database().sharing_rules();
    let existing = repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("rule {id}")))?;

    let rule = Rule {
        id,
        name: request.name,
        rule_type: request.rule_type,
        config: request.config,
        enabled: request.enabled,
        created_at: existing.created_at,
    };
    rule.validate()?;
    repo.update(&rule).await?;
    Ok(Json(rule))
}

/// `DELETE /api/rules/{id}`
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.monitor.database().sharing_rules().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/rules/defaults/{type}` — the type's default config, for the
/// rule editor.
pub async fn rule_defaults(
    Path(rule_type): Path<RuleType>,
) -> AppResult<Json<Value>> {
    let defaults = match rule_type {
        RuleType::ImpossibleTravel => {
            serde_json::to_value(vigil_model::ImpossibleTravelConfig::default())
        }
        RuleType::ConcurrentStreams => {
            serde_json::to_value(vigil_model::ConcurrentStreamsConfig::default())
        }
        RuleType::SimultaneousLocations => serde_json::to_value(
            vigil_model::SimultaneousLocationsConfig::default(),
        ),
        RuleType::DeviceVelocity => {
            serde_json::to_value(vigil_model::DeviceVelocityConfig::default())
        }
        RuleType::GeoRestriction => {
            serde_json::to_value(vigil_model::GeoRestrictionConfig::default())
        }
        RuleType::NewDevice => {
            serde_json::to_value(vigil_model::NewDeviceConfig::default())
        }
        RuleType::NewLocation => {
            serde_json::to_value(vigil_model::NewLocationConfig::default())
        }
    }
    .map_err(|e| AppError::internal(e.to_string()))?;
    Ok(Json(defaults))
}
