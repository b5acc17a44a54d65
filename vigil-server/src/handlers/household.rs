use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::infra::app_state::AppState;
use vigil_model::HouseholdLocation;

/// `GET /api/household`
pub async fn list_locations(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<HouseholdLocation>>> {
    Ok(Json(state.monitor.database().household().list().await?))
}

/// `POST /api/household/recalculate` — rescan history for trusted
/// locations.
pub async fn recalculate(
    State(state): State<AppState>,
) -> AppResult<Json<serde_json::Value>> {
    let learned = state.monitor.recalculate_household().await?;
    Ok(Json(json!({ "learned": learned })))
}

#[derive(Debug, Deserialize)]
pub struct TrustRequest {
    pub trusted: bool,
}

/// `PUT /api/household/{id}/trust`
pub async fn set_trusted(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TrustRequest>,
) -> AppResult<StatusCode> {
    state
        .monitor
        .database()
        .household()
        .set_trusted(id, request.trusted)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/household/{id}`
pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.monitor.database().household().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
