use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::{ChannelRepository, NotificationQueueRepository};
use crate::error::{MonitorError, Result};
use vigil_model::{
    ChannelKind, DeliveryState, NotificationChannel, PendingNotification,
};

#[derive(Debug, Clone)]
pub struct PostgresChannelRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: Uuid,
    name: String,
    kind: String,
    config: Value,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl ChannelRow {
    fn into_channel(self) -> Result<NotificationChannel> {
        let kind: ChannelKind = self.kind.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "stored channel {} has unknown kind {:?}",
                self.id, self.kind
            ))
        })?;
        Ok(NotificationChannel {
            id: self.id,
            name: self.name,
            kind,
            config: self.config,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

const CHANNEL_SELECT: &str = r#"
    SELECT id, name, kind, config, enabled, created_at
    FROM notification_channels
"#;

impl PostgresChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PostgresChannelRepository {
    async fn create(&self, channel: &NotificationChannel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_channels (id, name, kind, config, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(&channel.config)
        .bind(channel.enabled)
        .bind(channel.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, channel: &NotificationChannel) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE notification_channels
            SET name = $2, kind = $3, config = $4, enabled = $5
            WHERE id = $1
            "#,
        )
        .bind(channel.id)
        .bind(&channel.name)
        .bind(channel.kind.as_str())
        .bind(&channel.config)
        .bind(channel.enabled)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!(
                "channel {}",
                channel.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM notification_channels WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("channel {id}")));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>> {
        let row: Option<ChannelRow> =
            sqlx::query_as(&format!("{CHANNEL_SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ChannelRow::into_channel).transpose()
    }

    async fn list(&self) -> Result<Vec<NotificationChannel>> {
        let rows: Vec<ChannelRow> =
            sqlx::query_as(&format!("{CHANNEL_SELECT} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ChannelRow::into_channel).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<NotificationChannel>> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "{CHANNEL_SELECT} WHERE enabled ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChannelRow::into_channel).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresNotificationQueueRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    violation_id: Uuid,
    channel_id: Uuid,
    state: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl QueueRow {
    fn into_pending(self) -> Result<PendingNotification> {
        let state: DeliveryState = self.state.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "queue entry {} has unknown state {:?}",
                self.id, self.state
            ))
        })?;
        Ok(PendingNotification {
            id: self.id,
            violation_id: self.violation_id,
            channel_id: self.channel_id,
            state,
            attempts: self.attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}

impl PostgresNotificationQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueueRepository for PostgresNotificationQueueRepository {
    async fn enqueue(
        &self,
        violation_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<()> {
        let now = Utc::now();
        for channel_id in channel_ids {
            sqlx::query(
                r#"
                INSERT INTO notification_queue
                    (violation_id, channel_id, state, attempts, next_attempt_at, created_at)
                VALUES ($1, $2, 'pending', 0, $3, $3)
                ON CONFLICT (violation_id, channel_id) DO NOTHING
                "#,
            )
            .bind(violation_id)
            .bind(channel_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn due_for_channel(
        &self,
        channel_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PendingNotification>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT id, violation_id, channel_id, state, attempts,
                   next_attempt_at, last_error, created_at
            FROM notification_queue
            WHERE channel_id = $1 AND state = 'pending'
              AND next_attempt_at <= $2
            ORDER BY next_attempt_at
            LIMIT $3
            "#,
        )
        .bind(channel_id)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QueueRow::into_pending).collect()
    }

    async fn mark_delivered(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue
            SET state = 'delivered'
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        dead_letter: bool,
    ) -> Result<()> {
        let state = if dead_letter {
            DeliveryState::DeadLettered
        } else {
            DeliveryState::Pending
        };
        sqlx::query(
            r#"
            UPDATE notification_queue
            SET state = $2, attempts = attempts + 1,
                next_attempt_at = $3, last_error = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(state.as_str())
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
