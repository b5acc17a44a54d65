use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_model::{ChannelKind, NotificationChannel};

/// API view of a channel; configs carry credentials, so only the shape of
/// the channel is echoed back.
#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub enabled: bool,
    pub created_at: chrono::DateTime<Utc>,
}

impl From<NotificationChannel> for ChannelResponse {
    fn from(channel: NotificationChannel) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            kind: channel.kind,
            enabled: channel.enabled,
            created_at: channel.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    pub kind: ChannelKind,
    pub config: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// `GET /api/notifications`
pub async fn list_channels(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ChannelResponse>>> {
    let channels = state.monitor.database().channels().list().await?;
    Ok(Json(
        channels.into_iter().map(ChannelResponse::from).collect(),
    ))
}

/// `POST /api/notifications` — config validated per kind on save.
pub async fn create_channel(
    State(state): State<AppState>,
    Json(request): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Json<ChannelResponse>)> {
    let channel = NotificationChannel {
        id: Uuid::new_v4(),
        name: request.name,
        kind: request.kind,
        config: request.config,
        enabled: request.enabled,
        created_at: Utc::now(),
    };
    channel.validate()?;
    state
        .monitor
        .database()
        .channels()
        .create(&channel)
        .await?;
    Ok((StatusCode::CREATED, Json(channel.into())))
}

/// `PUT /api/notifications/{id}`
pub async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateChannelRequest>,
) -> AppResult<Json<ChannelResponse>> {
    let repo = state.monitor.database().channels();
    let existing = repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("channel {id}")))?;

    let channel = NotificationChannel {
        id,
        name: request.name,
        kind: request.kind,
        config: request.config,
        enabled: request.enabled,
        created_at: existing.created_at,
    };
    channel.validate()?;
    repo.update(&channel).await?;
    Ok(Json(channel.into()))
}

/// `DELETE /api/notifications/{id}`
pub async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.monitor.database().channels().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/notifications/{id}/test` — synthesize a delivery.
pub async fn test_channel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let channel = state
        .monitor
        .database()
        .channels()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("channel {id}")))?;
    state.monitor.dispatcher().send_test(&channel).await?;
    Ok(Json(json!({ "ok": true })))
}
