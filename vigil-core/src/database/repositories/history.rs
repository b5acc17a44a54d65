use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::HistoryRepository;
use crate::error::{MonitorError, Result};
use vigil_model::{
    HistoryPage, HistoryQuery, SortOrder, TranscodeInfo, WatchHistoryEntry,
};

#[derive(Debug, Clone)]
pub struct PostgresHistoryRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    server_id: Uuid,
    session_id: String,
    user_name: String,
    item_id: String,
    grandparent_item_id: Option<String>,
    title: String,
    grandparent_title: Option<String>,
    media_type: String,
    duration_ms: Option<i64>,
    watched_ms: i64,
    transcode: serde_json::Value,
    player: String,
    platform: String,
    ip_address: String,
    started_at: DateTime<Utc>,
    stopped_at: DateTime<Utc>,
    city: Option<String>,
    country: Option<String>,
    isp: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> Result<WatchHistoryEntry> {
        let transcode: TranscodeInfo = serde_json::from_value(self.transcode)
            .map_err(|e| {
                MonitorError::Internal(format!(
                    "history row {} has invalid transcode payload: {e}",
                    self.id
                ))
            })?;
        Ok(WatchHistoryEntry {
            id: self.id,
            server_id: self.server_id,
            session_id: self.session_id,
            user_name: self.user_name,
            item_id: self.item_id,
            grandparent_item_id: self.grandparent_item_id,
            title: self.title,
            grandparent_title: self.grandparent_title,
            media_type: self.media_type,
            duration_ms: self.duration_ms,
            watched_ms: self.watched_ms,
            transcode,
            player: self.player,
            platform: self.platform,
            ip_address: self.ip_address,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            city: self.city,
            country: self.country,
            isp: self.isp,
        })
    }
}

const SELECT: &str = r#"
    SELECT id, server_id, session_id, user_name, item_id,
           grandparent_item_id, title, grandparent_title, media_type,
           duration_ms, watched_ms, transcode, player, platform, ip_address,
           started_at, stopped_at, city, country, isp
    FROM watch_history
"#;

/// Sortable columns; anything else falls back to `stopped_at`.
fn sort_column(requested: &str) -> &'static str {
    match requested {
        "started_at" => "started_at",
        "user_name" => "user_name",
        "title" => "title",
        "watched_ms" => "watched_ms",
        _ => "stopped_at",
    }
}

impl PostgresHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryRepository for PostgresHistoryRepository {
    async fn insert(&self, entry: &WatchHistoryEntry) -> Result<bool> {
        let transcode = serde_json::to_value(&entry.transcode)?;
        let result = sqlx::query(
            r#"
            INSERT INTO watch_history (
                server_id, session_id, user_name, item_id,
                grandparent_item_id, title, grandparent_title, media_type,
                duration_ms, watched_ms, transcode, player, platform,
                ip_address, started_at, stopped_at, city, country, isp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19)
            ON CONFLICT (server_id, session_id, started_at) DO NOTHING
            "#,
        )
        .bind(entry.server_id)
        .bind(&entry.session_id)
        .bind(&entry.user_name)
        .bind(&entry.item_id)
        .bind(&entry.grandparent_item_id)
        .bind(&entry.title)
        .bind(&entry.grandparent_title)
        .bind(&entry.media_type)
        .bind(entry.duration_ms)
        .bind(entry.watched_ms)
        .bind(transcode)
        .bind(&entry.player)
        .bind(&entry.platform)
        .bind(&entry.ip_address)
        .bind(entry.started_at)
        .bind(entry.stopped_at)
        .bind(&entry.city)
        .bind(&entry.country)
        .bind(&entry.isp)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let per_page = query.per_page.clamp(1, 500);
        let server_filter: Option<Vec<Uuid>> = if query.server_ids.is_empty() {
            None
        } else {
            Some(query.server_ids.clone())
        };
        let order = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let column = sort_column(&query.sort_by);

        let filter = r#"
            WHERE ($1::uuid[] IS NULL OR server_id = ANY($1))
              AND ($2::text IS NULL OR user_name = $2)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM watch_history {filter}"
        ))
        .bind(&server_filter)
        .bind(&query.user_name)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            "{SELECT} {filter} ORDER BY {column} {order} LIMIT $3 OFFSET $4"
        ))
        .bind(&server_filter)
        .bind(&query.user_name)
        .bind(i64::from(per_page))
        .bind(query.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(HistoryPage {
            entries: rows
                .into_iter()
                .map(HistoryRow::into_entry)
                .collect::<Result<_>>()?,
            page: query.page.max(1),
            per_page,
            total,
        })
    }

    async fn recent_for_user(
        &self,
        user_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WatchHistoryEntry>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE user_name = $1 AND stopped_at >= $2 ORDER BY stopped_at DESC"
        ))
        .bind(user_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    async fn last_for_user(
        &self,
        user_name: &str,
    ) -> Result<Option<WatchHistoryEntry>> {
        let row: Option<HistoryRow> = sqlx::query_as(&format!(
            "{SELECT} WHERE user_name = $1 ORDER BY stopped_at DESC LIMIT 1"
        ))
        .bind(user_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(HistoryRow::into_entry).transpose()
    }

    async fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let users: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT user_name
            FROM watch_history
            WHERE stopped_at >= $1
            ORDER BY user_name
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn devices_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<(String, String)>> {
        #[derive(sqlx::FromRow)]
        struct DeviceRow {
            player: String,
            platform: String,
        }

        let rows: Vec<DeviceRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT player, platform
            FROM watch_history
            WHERE user_name = $1
            "#,
        )
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.player, r.platform)).collect())
    }
}
