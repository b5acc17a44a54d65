use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use vigil_model::{HistoryPage, HistoryQuery, SortOrder};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HistoryParams {
    pub page: u32,
    pub per_page: u32,
    pub sort_by: String,
    pub sort_order: SortOrder,
    /// Comma-separated server ids.
    pub server_ids: Option<String>,
    pub user: Option<String>,
}

impl Default for HistoryParams {
    fn default() -> Self {
        let defaults = HistoryQuery::default();
        Self {
            page: defaults.page,
            per_page: defaults.per_page,
            sort_by: defaults.sort_by,
            sort_order: defaults.sort_order,
            server_ids: None,
            user: None,
        }
    }
}

impl HistoryParams {
    fn into_query(self) -> Result<HistoryQuery, AppError> {
        let server_ids = match self.server_ids.as_deref() {
            None | Some("") => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(|part| {
                    part.trim().parse::<Uuid>().map_err(|_| {
                        AppError::bad_request(format!(
                            "invalid server id {part:?}"
                        ))
                        .with_code("validation")
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(HistoryQuery {
            page: self.page,
            per_page: self.per_page,
            sort_by: self.sort_by,
            sort_order: self.sort_order,
            server_ids,
            user_name: self.user,
        })
    }
}

/// `GET /api/history` — paginated watch history.
pub async fn list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<HistoryPage>> {
    let query = params.into_query()?;
    let page = state.monitor.database().history().query(&query).await?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_ids_parse_from_comma_list() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let params = HistoryParams {
            server_ids: Some(format!("{a}, {b}")),
            ..Default::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.server_ids, vec![a, b]);
    }

    #[test]
    fn bad_server_id_rejects() {
        let params = HistoryParams {
            server_ids: Some("not-a-uuid".into()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }

    #[test]
    fn defaults_match_model() {
        let query = HistoryParams::default().into_query().unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.per_page, 50);
        assert_eq!(query.sort_by, "stopped_at");
    }
}
