use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::Utc;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_core::database::ports::{
    CandidatePage, LibraryItemRepository, MaintenanceRepository,
};
use vigil_core::maintenance::bulk_delete;
use vigil_core::AdapterRegistry;
use vigil_model::{
    LibraryItemCache, MaintenanceCandidate, MaintenanceExclusion,
    MaintenanceRule, SyncProgress,
};

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub server_id: Uuid,
    pub library_id: String,
}

/// `POST /api/maintenance/sync` — 202 when started, 409 when already
/// running for the key.
pub async fn start_sync(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> AppResult<StatusCode> {
    state
        .monitor
        .sync_manager()
        .start_sync(request.server_id, request.library_id)?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /api/maintenance/sync/status` — progress per active key.
pub async fn sync_status(
    State(state): State<AppState>,
) -> Json<std::collections::HashMap<String, SyncProgress>> {
    Json(state.monitor.sync_manager().status())
}

#[derive(Debug, Deserialize)]
pub struct CreateRuleRequest {
    pub name: String,
    pub criterion_type: vigil_model::CriterionType,
    pub media_type: vigil_model::MediaType,
    #[serde(default = "empty_object")]
    pub parameters: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub libraries: Vec<vigil_model::RuleLibraryScope>,
}

fn empty_object() -> Value {
    json!({})
}

fn default_true() -> bool {
    true
}

/// `GET /api/maintenance/rules`
pub async fn list_rules(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<MaintenanceRule>>> {
    Ok(Json(
        state.monitor.database().maintenance().list_rules().await?,
    ))
}

/// `POST /api/maintenance/rules`
pub async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<CreateRuleRequest>,
) -> AppResult<(StatusCode, Json<MaintenanceRule>)> {
    let rule = MaintenanceRule {
        id: Uuid::new_v4(),
        name: request.name,
        criterion_type: request.criterion_type,
        media_type: request.media_type,
        parameters: request.parameters,
        enabled: request.enabled,
        libraries: request.libraries,
        created_at: Utc::now(),
    };
    rule.validate()?;
    state
        .monitor
        .database()
        .maintenance()
        .create_rule(&rule)
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// `PUT /api/maintenance/rules/{id}`
pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateRuleRequest>,
) -> AppResult<Json<MaintenanceRule>> {
    let repo = state.monitor.database().maintenance();
    let existing = repo
        .get_rule(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("rule {id}")))?;

    let rule = MaintenanceRule {
        id,
        name: request.name,
        criterion_type: request.criterion_type,
        media_type: request.media_type,
        parameters: request.parameters,
        enabled: request.enabled,
        libraries: request.libraries,
        created_at: existing.created_at,
    };
    rule.validate()?;
    repo.update_rule(&rule).await?;
    Ok(Json(rule))
}

/// `DELETE /api/maintenance/rules/{id}`
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state
        .monitor
        .database()
        .maintenance()
        .delete_rule(id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/maintenance/rules/{id}/evaluate` — recompute candidates now.
pub async fn evaluate_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let rule = state
        .monitor
        .database()
        .maintenance()
        .get_rule(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("rule {id}")))?;
    let candidates = state.monitor.evaluator().evaluate_rule(&rule).await?;
    Ok(Json(json!({ "candidates": candidates })))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PageParams {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CandidateResponse {
    #[serde(flatten)]
    pub candidate: MaintenanceCandidate,
    pub item: LibraryItemCache,
}

#[derive(Debug, Serialize)]
pub struct CandidatePageResponse {
    pub candidates: Vec<CandidateResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl From<CandidatePage> for CandidatePageResponse {
    fn from(page: CandidatePage) -> Self {
        Self {
            candidates: page
                .rows
                .into_iter()
                .map(|row| CandidateResponse {
                    candidate: row.candidate,
                    item: row.item,
                })
                .collect(),
            page: page.page,
            per_page: page.per_page,
            total: page.total,
        }
    }
}

/// `GET /api/maintenance/rules/{id}/candidates` — paginated.
pub async fn list_candidates(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<CandidatePageResponse>> {
    let page = state
        .monitor
        .database()
        .maintenance()
        .candidates_page(id, params.page, params.per_page)
        .await?;
    Ok(Json(page.into()))
}

#[derive(Debug, Deserialize)]
pub struct ExclusionRequest {
    pub library_item_id: i64,
    #[serde(default)]
    pub excluded_by: Option<String>,
}

/// `POST /api/maintenance/rules/{id}/exclusions`
pub async fn add_exclusion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExclusionRequest>,
) -> AppResult<StatusCode> {
    let exclusion = MaintenanceExclusion {
        rule_id: id,
        library_item_id: request.library_item_id,
        excluded_by: request
            .excluded_by
            .unwrap_or_else(|| "admin".to_string()),
        excluded_at: Utc::now(),
    };
    state
        .monitor
        .database()
        .maintenance()
        .add_exclusion(&exclusion)
        .await?;
    Ok(StatusCode::CREATED)
}

/// `DELETE /api/maintenance/rules/{id}/exclusions/{item_id}`
pub async fn remove_exclusion(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, i64)>,
) -> AppResult<StatusCode> {
    state
        .monitor
        .database()
        .maintenance()
        .remove_exclusion(id, item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/maintenance/rules/{id}/exclusions`
pub async fn list_exclusions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<MaintenanceExclusion>>> {
    Ok(Json(
        state
            .monitor
            .database()
            .maintenance()
            .list_exclusions(id)
            .await?,
    ))
}

/// `GET /api/maintenance/items/{server_id}/{item_id}` — on-demand vendor
/// enrichment for the candidates view.
pub async fn item_details(
    State(state): State<AppState>,
    Path((server_id, item_id)): Path<(Uuid, String)>,
) -> AppResult<Json<vigil_model::ItemDetails>> {
    let adapter = state.monitor.adapters().get(&server_id).ok_or_else(|| {
        AppError::not_found(format!("no adapter for server {server_id}"))
    })?;
    Ok(Json(adapter.get_item_details(&item_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub rule_id: Uuid,
    pub candidate_ids: Vec<i64>,
}

/// Streaming bulk delete: per-item progress frames closed by one
/// `event: complete` frame. Dropping the stream cancels the items not yet
/// started. Factored off the handler so tests can drive it through a bare
/// router with fake repositories.
pub fn bulk_delete_sse(
    maintenance_repo: Arc<dyn MaintenanceRepository>,
    items: Arc<dyn LibraryItemRepository>,
    adapters: AdapterRegistry,
    request: BulkDeleteRequest,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        bulk_delete::execute(
            maintenance_repo,
            items,
            adapters,
            request.rule_id,
            request.candidate_ids,
            tx,
            task_cancel,
        )
        .await
    });

    // Dropping the SSE stream drops this guard, which cancels the items
    // not yet started; the in-flight delete always runs to completion.
    let guard = cancel.drop_guard();

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            match Event::default().json_data(&frame) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!("progress frame encoding failed: {e}"),
            }
        }
        match task.await {
            Ok(Ok(result)) => {
                match Event::default().event("complete").json_data(&result) {
                    Ok(event) => yield Ok(event),
                    Err(e) => warn!("complete frame encoding failed: {e}"),
                }
            }
            Ok(Err(e)) => {
                let payload = json!({ "error": e.to_string() });
                if let Ok(event) =
                    Event::default().event("error").json_data(&payload)
                {
                    yield Ok(event);
                }
            }
            Err(e) => warn!("bulk delete task failed: {e}"),
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// `POST /api/maintenance/candidates/bulk-delete`
pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(request): Json<BulkDeleteRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let db = state.monitor.database();
    bulk_delete_sse(
        db.maintenance(),
        db.library_items(),
        state.monitor.adapters(),
        request,
    )
}
