use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::{SessionSnapshot, SessionSnapshotRepository};
use crate::error::{MonitorError, Result};
use vigil_model::{ActiveStream, SessionKey};

#[derive(Debug, Clone)]
pub struct PostgresSessionSnapshotRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    server_id: Uuid,
    session_id: String,
    payload: serde_json::Value,
    watched_ms: i64,
    last_poll_seen: DateTime<Utc>,
}

impl SnapshotRow {
    fn into_snapshot(self) -> Result<SessionSnapshot> {
        let stream: ActiveStream =
            serde_json::from_value(self.payload).map_err(|e| {
                MonitorError::Internal(format!(
                    "session snapshot {}:{} has invalid payload: {e}",
                    self.server_id, self.session_id
                ))
            })?;
        Ok(SessionSnapshot {
            stream,
            watched_ms: self.watched_ms,
            last_poll_seen: self.last_poll_seen,
        })
    }
}

impl PostgresSessionSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionSnapshotRepository for PostgresSessionSnapshotRepository {
    async fn upsert(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let payload = serde_json::to_value(&snapshot.stream)?;
        sqlx::query(
            r#"
            INSERT INTO active_session_snapshots
                (server_id, session_id, payload, watched_ms, last_poll_seen)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (server_id, session_id) DO UPDATE
            SET payload = EXCLUDED.payload,
                watched_ms = EXCLUDED.watched_ms,
                last_poll_seen = EXCLUDED.last_poll_seen
            "#,
        )
        .bind(snapshot.stream.server_id)
        .bind(&snapshot.stream.session_id)
        .bind(payload)
        .bind(snapshot.watched_ms)
        .bind(snapshot.last_poll_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &SessionKey) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM active_session_snapshots
            WHERE server_id = $1 AND session_id = $2
            "#,
        )
        .bind(key.server_id)
        .bind(&key.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<SessionSnapshot>> {
        let mut tx = self.pool.begin().await?;
        let rows: Vec<SnapshotRow> = sqlx::query_as(
            r#"
            SELECT server_id, session_id, payload, watched_ms, last_poll_seen
            FROM active_session_snapshots
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM active_session_snapshots")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        rows.into_iter().map(SnapshotRow::into_snapshot).collect()
    }
}
