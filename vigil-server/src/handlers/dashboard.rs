use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::stream::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::errors::AppResult;
use crate::infra::app_state::AppState;
use vigil_core::lifecycle::events::EventReceiver;
use vigil_core::ActiveSessions;
use vigil_model::ActiveStream;

/// Rewrite a server-relative artwork path into the monitor's proxy form.
/// Absolute URLs (plex.tv style) pass through untouched.
fn proxy_thumb(stream: &mut ActiveStream) {
    if let Some(thumb) = &stream.thumb_url
        && !thumb.starts_with("http://")
        && !thumb.starts_with("https://")
    {
        stream.thumb_url = Some(format!(
            "/api/image-proxy?server_id={}&path={}",
            stream.server_id, thumb
        ));
    }
}

fn snapshot(active: &ActiveSessions) -> Vec<ActiveStream> {
    let mut streams = active.all();
    streams.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    for stream in &mut streams {
        proxy_thumb(stream);
    }
    streams
}

/// Long-lived stream of the active session set: one snapshot frame up
/// front, then a fresh one after every session event, until the bus
/// closes. Factored off the handler so tests can drive it through a bare
/// router.
pub fn dashboard_sse_stream(
    active: ActiveSessions,
    mut events: EventReceiver,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        match Event::default().json_data(&snapshot(&active)) {
            Ok(event) => yield Ok(event),
            Err(e) => warn!("dashboard frame encoding failed: {e}"),
        }
        loop {
            match events.recv().await {
                Ok(_) => {
                    match Event::default().json_data(&snapshot(&active)) {
                        Ok(event) => yield Ok(event),
                        Err(e) => {
                            warn!("dashboard frame encoding failed: {e}");
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "dashboard stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}

/// `GET /api/dashboard/sse` — long-lived stream of active sessions.
pub async fn dashboard_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    dashboard_sse_stream(
        state.monitor.active_sessions(),
        state.monitor.subscribe_events(),
    )
}

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub active_streams: usize,
    pub active_users: usize,
    pub violations_24h: i64,
    pub top_users: Vec<UserActivity>,
}

#[derive(Debug, Serialize)]
pub struct UserActivity {
    pub user_name: String,
    pub plays: i64,
}

/// `GET /api/dashboard/stats` — read-side counters for the landing view.
pub async fn dashboard_stats(
    State(state): State<AppState>,
) -> AppResult<Json<DashboardStats>> {
    let streams = state.monitor.active_sessions().all();
    let mut users: Vec<&str> =
        streams.iter().map(|s| s.user_name.as_str()).collect();
    users.sort_unstable();
    users.dedup();

    let db = state.monitor.database();
    let since = Utc::now() - ChronoDuration::hours(24);
    let violations_24h = db.violations().count_since(since).await?;

    let mut plays: std::collections::HashMap<String, i64> =
        std::collections::HashMap::new();
    for user in db.history().users_since(since).await? {
        let entries = db.history().recent_for_user(&user, since).await?;
        plays.insert(user, entries.len() as i64);
    }
    let mut top_users: Vec<UserActivity> = plays
        .into_iter()
        .map(|(user_name, plays)| UserActivity { user_name, plays })
        .collect();
    top_users.sort_by(|a, b| b.plays.cmp(&a.plays));
    top_users.truncate(10);

    Ok(Json(DashboardStats {
        active_streams: streams.len(),
        active_users: users.len(),
        violations_24h,
        top_users,
    }))
}

/// `GET /api/dashboard/sessions` — one-shot snapshot for non-SSE clients.
pub async fn active_sessions(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let streams = snapshot(&state.monitor.active_sessions());
    Json(json!({ "count": streams.len(), "sessions": streams }))
}
