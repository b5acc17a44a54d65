use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_model::RuleViolation;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ViolationParams {
    pub page: u32,
    pub per_page: u32,
    pub user: Option<String>,
}

impl Default for ViolationParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            user: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ViolationPageResponse {
    pub violations: Vec<RuleViolation>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

/// `GET /api/violations`
pub async fn list_violations(
    State(state): State<AppState>,
    Query(params): Query<ViolationParams>,
) -> AppResult<Json<ViolationPageResponse>> {
    let page = state
        .monitor
        .database()
        .violations()
        .list(params.page, params.per_page, params.user.as_deref())
        .await?;
    Ok(Json(ViolationPageResponse {
        violations: page.violations,
        page: page.page,
        per_page: page.per_page,
        total: page.total,
    }))
}

/// `GET /api/violations/{id}`
pub async fn get_violation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RuleViolation>> {
    let violation = state
        .monitor
        .database()
        .violations()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("violation {id}")))?;
    Ok(Json(violation))
}

/// `DELETE /api/violations/{id}`
pub async fn delete_violation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.monitor.database().violations().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
