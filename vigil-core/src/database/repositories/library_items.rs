use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::LibraryItemRepository;
use crate::error::{MonitorError, Result};
use vigil_model::{ExternalIds, LibraryItemCache, MediaType};

#[derive(Debug, Clone)]
pub struct PostgresLibraryItemRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
pub(crate) struct ItemRow {
    id: i64,
    server_id: Uuid,
    library_id: String,
    item_id: String,
    media_type: String,
    title: String,
    year: Option<i32>,
    added_at: Option<DateTime<Utc>>,
    video_resolution: Option<String>,
    file_size: Option<i64>,
    last_watched_at: Option<DateTime<Utc>>,
    play_count: i64,
    episode_count: Option<i32>,
    parent_item_id: Option<String>,
    tmdb_id: Option<String>,
    tvdb_id: Option<String>,
    imdb_id: Option<String>,
    synced_at: DateTime<Utc>,
}

impl ItemRow {
    pub(crate) fn into_item(self) -> Result<LibraryItemCache> {
        let media_type: MediaType = self.media_type.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "library item {} has unknown media type {:?}",
                self.id, self.media_type
            ))
        })?;
        Ok(LibraryItemCache {
            id: self.id,
            server_id: self.server_id,
            library_id: self.library_id,
            item_id: self.item_id,
            media_type,
            title: self.title,
            year: self.year,
            added_at: self.added_at,
            video_resolution: self.video_resolution,
            file_size: self.file_size,
            last_watched_at: self.last_watched_at,
            play_count: self.play_count,
            episode_count: self.episode_count,
            parent_item_id: self.parent_item_id,
            external_ids: ExternalIds {
                tmdb: self.tmdb_id,
                tvdb: self.tvdb_id,
                imdb: self.imdb_id,
            },
            synced_at: self.synced_at,
        })
    }
}

pub(crate) const ITEM_SELECT: &str = r#"
    SELECT id, server_id, library_id, item_id, media_type, title, year,
           added_at, video_resolution, file_size, last_watched_at,
           play_count, episode_count, parent_item_id, tmdb_id, tvdb_id,
           imdb_id, synced_at
    FROM library_items
"#;

impl PostgresLibraryItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LibraryItemRepository for PostgresLibraryItemRepository {
    async fn upsert(&self, item: &LibraryItemCache) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO library_items (
                server_id, library_id, item_id, media_type, title, year,
                added_at, video_resolution, file_size, episode_count,
                parent_item_id, tmdb_id, tvdb_id, imdb_id, synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15)
            ON CONFLICT (server_id, library_id, item_id) DO UPDATE
            SET media_type = EXCLUDED.media_type,
                title = EXCLUDED.title,
                year = EXCLUDED.year,
                added_at = EXCLUDED.added_at,
                video_resolution = EXCLUDED.video_resolution,
                file_size = EXCLUDED.file_size,
                episode_count = EXCLUDED.episode_count,
                parent_item_id = EXCLUDED.parent_item_id,
                tmdb_id = EXCLUDED.tmdb_id,
                tvdb_id = EXCLUDED.tvdb_id,
                imdb_id = EXCLUDED.imdb_id,
                synced_at = EXCLUDED.synced_at
            RETURNING id
            "#,
        )
        .bind(item.server_id)
        .bind(&item.library_id)
        .bind(&item.item_id)
        .bind(item.media_type.as_str())
        .bind(&item.title)
        .bind(item.year)
        .bind(item.added_at)
        .bind(&item.video_resolution)
        .bind(item.file_size)
        .bind(item.episode_count)
        .bind(&item.parent_item_id)
        .bind(&item.external_ids.tmdb)
        .bind(&item.external_ids.tvdb)
        .bind(&item.external_ids.imdb)
        .bind(item.synced_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn delete_absent(
        &self,
        server_id: Uuid,
        library_id: &str,
        synced_before: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM library_items
            WHERE server_id = $1 AND library_id = $2 AND synced_at < $3
            "#,
        )
        .bind(server_id)
        .bind(library_id)
        .bind(synced_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_watch_stats(
        &self,
        server_id: Uuid,
        library_id: &str,
        item_id: &str,
        last_watched_at: Option<DateTime<Utc>>,
        play_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE library_items
            SET last_watched_at = $4, play_count = $5
            WHERE server_id = $1 AND library_id = $2 AND item_id = $3
            "#,
        )
        .bind(server_id)
        .bind(library_id)
        .bind(item_id)
        .bind(last_watched_at)
        .bind(play_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<LibraryItemCache>> {
        let row: Option<ItemRow> =
            sqlx::query_as(&format!("{ITEM_SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ItemRow::into_item).transpose()
    }

    async fn get_many(&self, ids: &[i64]) -> Result<Vec<LibraryItemCache>> {
        let rows: Vec<ItemRow> =
            sqlx::query_as(&format!("{ITEM_SELECT} WHERE id = ANY($1)"))
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ItemRow::into_item).collect()
    }

    async fn items_in_scopes(
        &self,
        scopes: &[(Uuid, String)],
        media_type: Option<MediaType>,
    ) -> Result<Vec<LibraryItemCache>> {
        let mut items = Vec::new();
        // Scope counts are small (a handful of libraries per rule), so one
        // query per scope keeps the SQL simple.
        for (server_id, library_id) in scopes {
            let rows: Vec<ItemRow> = sqlx::query_as(&format!(
                r#"{ITEM_SELECT}
                WHERE server_id = $1 AND library_id = $2
                  AND ($3::text IS NULL OR media_type = $3)
                ORDER BY id"#
            ))
            .bind(server_id)
            .bind(library_id)
            .bind(media_type.map(|m| m.as_str()))
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                items.push(row.into_item()?);
            }
        }
        Ok(items)
    }

    async fn cross_server_count(
        &self,
        server_id: Uuid,
        ids: &ExternalIds,
    ) -> Result<i64> {
        let Some((provider, id)) = ids.preferred() else {
            return Ok(0);
        };
        let column = match provider {
            "tmdb" => "tmdb_id",
            "tvdb" => "tvdb_id",
            _ => "imdb_id",
        };
        let count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(DISTINCT li.server_id)
            FROM library_items li
            JOIN servers s ON s.id = li.server_id
            WHERE li.{column} = $1 AND li.server_id <> $2 AND s.enabled
            "#
        ))
        .bind(id)
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
