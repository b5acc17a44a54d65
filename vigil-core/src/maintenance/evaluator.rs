use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::criteria;
use crate::database::ports::{LibraryItemRepository, MaintenanceRepository};
use crate::error::{MonitorError, Result};
use vigil_model::{
    CriterionType, LibraryItemCache, MaintenanceCandidate, MaintenanceRule,
    MediaType, UnwatchedTvParams,
};

/// Criterion-typed candidate computation.
///
/// Per rule: load the scoped cache slice, apply the criterion, subtract the
/// exclusion set, then atomically replace the rule's candidate set.
pub struct MaintenanceEvaluator {
    maintenance: Arc<dyn MaintenanceRepository>,
    items: Arc<dyn LibraryItemRepository>,
}

impl std::fmt::Debug for MaintenanceEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceEvaluator").finish()
    }
}

/// An item that matched, with its reason.
struct Match {
    item_id: i64,
    server_id: Uuid,
    external_ids: vigil_model::ExternalIds,
    reason: String,
}

impl MaintenanceEvaluator {
    pub fn new(
        maintenance: Arc<dyn MaintenanceRepository>,
        items: Arc<dyn LibraryItemRepository>,
    ) -> Self {
        Self { maintenance, items }
    }

    /// Evaluate every enabled rule; one failing rule skips, it never fails
    /// the pass.
    pub async fn evaluate_all(&self) -> Result<()> {
        for rule in self.maintenance.list_enabled_rules().await? {
            if let Err(e) = self.evaluate_rule(&rule).await {
                warn!(rule = %rule.name, "maintenance evaluation skipped: {e}");
            }
        }
        Ok(())
    }

    /// Evaluate the enabled rules that touch `server_id`.
    pub async fn evaluate_server(&self, server_id: Uuid) -> Result<()> {
        for rule in self.maintenance.list_enabled_rules().await? {
            if !rule.libraries.iter().any(|s| s.server_id == server_id) {
                continue;
            }
            if let Err(e) = self.evaluate_rule(&rule).await {
                warn!(rule = %rule.name, "maintenance evaluation skipped: {e}");
            }
        }
        Ok(())
    }

    /// Recompute one rule's candidate set. Returns the candidate count.
    pub async fn evaluate_rule(&self, rule: &MaintenanceRule) -> Result<usize> {
        let now = Utc::now();
        let scopes: Vec<(Uuid, String)> = rule
            .libraries
            .iter()
            .map(|s| (s.server_id, s.library_id.clone()))
            .collect();

        let matches = match rule.criterion_type {
            CriterionType::UnwatchedMovie => {
                let params = parse(rule)?;
                let items = self
                    .items
                    .items_in_scopes(&scopes, Some(MediaType::Movie))
                    .await?;
                items
                    .iter()
                    .filter_map(|item| {
                        criteria::matches_unwatched_movie(item, &params, now)
                            .map(|reason| to_match(item, reason))
                    })
                    .collect()
            }
            CriterionType::UnwatchedTvNone => {
                let params: UnwatchedTvParams = parse(rule)?;
                let items = self.items.items_in_scopes(&scopes, None).await?;
                unwatched_series(&items, &params, now)
            }
            CriterionType::LowResolution => {
                let params = parse(rule)?;
                let items = self
                    .items
                    .items_in_scopes(&scopes, media_gate(rule))
                    .await?;
                items
                    .iter()
                    .filter_map(|item| {
                        criteria::matches_low_resolution(item, &params)
                            .map(|reason| to_match(item, reason))
                    })
                    .collect()
            }
            CriterionType::LargeFiles => {
                let params = parse(rule)?;
                let items = self
                    .items
                    .items_in_scopes(&scopes, media_gate(rule))
                    .await?;
                items
                    .iter()
                    .filter_map(|item| {
                        criteria::matches_large_files(item, &params)
                            .map(|reason| to_match(item, reason))
                    })
                    .collect()
            }
        };

        let excluded: HashSet<i64> = self
            .maintenance
            .list_exclusions(rule.id)
            .await?
            .into_iter()
            .map(|e| e.library_item_id)
            .collect();

        let mut candidates = Vec::new();
        for matched in matches {
            if excluded.contains(&matched.item_id) {
                continue;
            }
            let cross_server_count = self
                .items
                .cross_server_count(matched.server_id, &matched.external_ids)
                .await?;
            candidates.push(MaintenanceCandidate {
                rule_id: rule.id,
                library_item_id: matched.item_id,
                reason: matched.reason,
                computed_at: now,
                cross_server_count,
            });
        }

        self.maintenance
            .replace_candidates(rule.id, &candidates)
            .await?;
        info!(
            rule = %rule.name,
            candidates = candidates.len(),
            "candidate set replaced"
        );
        Ok(candidates.len())
    }
}

fn parse<T: serde::de::DeserializeOwned>(rule: &MaintenanceRule) -> Result<T> {
    serde_json::from_value(rule.parameters.clone()).map_err(|e| {
        MonitorError::validation(format!(
            "rule {} has invalid parameters: {e}",
            rule.id
        ))
    })
}

/// The rule's media gate, when it narrows beyond "anything".
fn media_gate(rule: &MaintenanceRule) -> Option<MediaType> {
    match rule.media_type {
        MediaType::Other => None,
        gate => Some(gate),
    }
}

fn to_match(item: &LibraryItemCache, reason: String) -> Match {
    Match {
        item_id: item.id,
        server_id: item.server_id,
        external_ids: item.external_ids.clone(),
        reason,
    }
}

/// `unwatched_tv_none`, aggregated to the series: a series qualifies when
/// none of its episodes has a play record within the window. The candidate
/// points at the series cache row when one exists, else the first episode.
fn unwatched_series(
    items: &[LibraryItemCache],
    params: &UnwatchedTvParams,
    now: DateTime<Utc>,
) -> Vec<Match> {
    let cutoff = now - Duration::days(i64::from(params.days));

    let series_rows: HashMap<&str, &LibraryItemCache> = items
        .iter()
        .filter(|item| item.media_type == MediaType::Series)
        .map(|item| (item.item_id.as_str(), item))
        .collect();

    let mut episodes_by_series: HashMap<&str, Vec<&LibraryItemCache>> =
        HashMap::new();
    for item in items {
        if item.media_type != MediaType::Episode {
            continue;
        }
        let Some(parent) = item.parent_item_id.as_deref() else {
            continue;
        };
        episodes_by_series.entry(parent).or_default().push(item);
    }

    let mut matches = Vec::new();
    for (series_id, episodes) in episodes_by_series {
        let last_play = episodes
            .iter()
            .filter_map(|e| e.last_watched_at)
            .chain(
                series_rows
                    .get(series_id)
                    .and_then(|s| s.last_watched_at),
            )
            .max();
        let watched_recently =
            last_play.is_some_and(|watched| watched > cutoff);
        if watched_recently {
            continue;
        }

        let anchor = series_rows
            .get(series_id)
            .copied()
            .or_else(|| episodes.first().copied());
        if let Some(anchor) = anchor {
            let reason = match last_play {
                None => format!(
                    "no episode played in the last {} days",
                    params.days
                ),
                Some(_) => format!(
                    "last episode play is older than {} days",
                    params.days
                ),
            };
            matches.push(to_match(anchor, reason));
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_model::ExternalIds;

    fn episode(
        series: &str,
        id: i64,
        last_watched: Option<DateTime<Utc>>,
    ) -> LibraryItemCache {
        LibraryItemCache {
            id,
            server_id: Uuid::nil(),
            library_id: "tv".into(),
            item_id: format!("ep-{id}"),
            media_type: MediaType::Episode,
            title: format!("Episode {id}"),
            year: None,
            added_at: Some(Utc::now() - Duration::days(400)),
            video_resolution: None,
            file_size: None,
            last_watched_at: last_watched,
            play_count: 0,
            episode_count: None,
            parent_item_id: Some(series.to_string()),
            external_ids: ExternalIds::default(),
            synced_at: Utc::now(),
        }
    }

    fn series_row(item_id: &str, id: i64) -> LibraryItemCache {
        let mut row = episode("unused", id, None);
        row.media_type = MediaType::Series;
        row.item_id = item_id.to_string();
        row.parent_item_id = None;
        row
    }

    #[test]
    fn fully_unwatched_series_matches_via_series_row() {
        let items = vec![
            series_row("show-1", 1),
            episode("show-1", 2, None),
            episode("show-1", 3, None),
        ];
        let params = UnwatchedTvParams { days: 180 };
        let matches = unwatched_series(&items, &params, Utc::now());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].item_id, 1);
    }

    #[test]
    fn recent_play_on_any_episode_saves_the_series() {
        let items = vec![
            series_row("show-1", 1),
            episode("show-1", 2, None),
            episode("show-1", 3, Some(Utc::now() - Duration::days(2))),
        ];
        let params = UnwatchedTvParams { days: 180 };
        assert!(unwatched_series(&items, &params, Utc::now()).is_empty());
    }

    #[test]
    fn missing_series_row_anchors_on_an_episode() {
        let items = vec![episode("show-2", 7, None)];
        let params = UnwatchedTvParams { days: 180 };
        let matches = unwatched_series(&items, &params, Utc::now());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].item_id, 7);
    }

    #[test]
    fn stale_play_still_matches() {
        let items = vec![
            series_row("show-1", 1),
            episode("show-1", 2, Some(Utc::now() - Duration::days(365))),
        ];
        let params = UnwatchedTvParams { days: 180 };
        let matches = unwatched_series(&items, &params, Utc::now());
        assert_eq!(matches.len(), 1);
    }
}
