use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_model::{Server, ServerKind};

/// API view of a server; the secret never leaves the process.
#[derive(Debug, Serialize)]
pub struct ServerResponse {
    pub id: Uuid,
    pub name: String,
    pub kind: ServerKind,
    pub url: String,
    pub machine_id: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Server> for ServerResponse {
    fn from(server: Server) -> Self {
        Self {
            id: server.id,
            name: server.name,
            kind: server.kind,
            url: server.url,
            machine_id: server.machine_id,
            enabled: server.enabled,
            created_at: server.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateServerRequest {
    pub name: String,
    pub kind: ServerKind,
    pub url: String,
    pub api_key: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateServerRequest {
    pub name: Option<String>,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub machine_id: Option<String>,
    pub enabled: Option<bool>,
}

fn validate_server(server: &Server) -> Result<(), AppError> {
    if server.name.is_empty() || server.name.len() > 255 {
        return Err(AppError::bad_request(
            "server name must be 1..=255 characters",
        )
        .with_code("validation"));
    }
    if server.api_key.is_empty() {
        return Err(
            AppError::bad_request("api key must not be empty")
                .with_code("validation"),
        );
    }
    let parsed = url::Url::parse(&server.url).map_err(|e| {
        AppError::bad_request(format!("invalid server URL: {e}"))
            .with_code("validation")
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(AppError::bad_request("server URL must be http(s)")
            .with_code("validation"));
    }
    Ok(())
}

/// `GET /api/servers`
pub async fn list_servers(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ServerResponse>>> {
    let servers = state.monitor.database().servers().list().await?;
    Ok(Json(servers.into_iter().map(ServerResponse::from).collect()))
}

/// `POST /api/servers`
pub async fn create_server(
    State(state): State<AppState>,
    Json(request): Json<CreateServerRequest>,
) -> AppResult<(StatusCode, Json<ServerResponse>)> {
    let server = Server {
        id: Uuid::new_v4(),
        name: request.name,
        kind: request.kind,
        url: request.url,
        api_key: request.api_key,
        machine_id: request.machine_id,
        enabled: request.enabled,
        created_at: Utc::now(),
    };
    validate_server(&server)?;

    state.monitor.database().servers().create(&server).await?;
    state.monitor.attach_server(&server);
    Ok((StatusCode::CREATED, Json(server.into())))
}

/// `PUT /api/servers/{id}`
pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateServerRequest>,
) -> AppResult<Json<ServerResponse>> {
    let repo = state.monitor.database().servers();
    let mut server = repo
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("server {id}")))?;

    if let Some(name) = request.name {
        server.name = name;
    }
    if let Some(url) = request.url {
        server.url = url;
    }
    if let Some(api_key) = request.api_key {
        server.api_key = api_key;
    }
    if let Some(machine_id) = request.machine_id {
        server.machine_id = Some(machine_id);
    }
    if let Some(enabled) = request.enabled {
        server.enabled = enabled;
    }
    validate_server(&server)?;

    repo.update(&server).await?;
    state.monitor.attach_server(&server);
    Ok(Json(server.into()))
}

/// `DELETE /api/servers/{id}` — cascades to history and library cache.
pub async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.monitor.database().servers().delete(id).await?;
    state.monitor.detach_server(&id);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/servers/{id}/test` — adapter reachability check.
pub async fn test_server(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let server = state
        .monitor
        .database()
        .servers()
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("server {id}")))?;
    state.monitor.test_server(&server).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    pub since: Option<DateTime<Utc>>,
}

/// `POST /api/servers/{id}/import-history` — back-fill from the vendor.
pub async fn import_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ImportParams>,
) -> AppResult<Json<serde_json::Value>> {
    let inserted = state.monitor.import_history(id, params.since).await?;
    Ok(Json(json!({ "imported": inserted })))
}
