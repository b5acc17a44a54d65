use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::ServerRepository;
use crate::error::{MonitorError, Result};
use vigil_model::{Server, ServerKind};

#[derive(Debug, Clone)]
pub struct PostgresServerRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: Uuid,
    name: String,
    kind: String,
    url: String,
    api_key: String,
    machine_id: Option<String>,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl ServerRow {
    fn into_server(self) -> Result<Server> {
        let kind: ServerKind = self.kind.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "stored server {} has unknown kind {:?}",
                self.id, self.kind
            ))
        })?;
        Ok(Server {
            id: self.id,
            name: self.name,
            kind,
            url: self.url,
            api_key: self.api_key,
            machine_id: self.machine_id,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

const SELECT: &str = r#"
    SELECT id, name, kind, url, api_key, machine_id, enabled, created_at
    FROM servers
"#;

impl PostgresServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServerRepository for PostgresServerRepository {
    async fn list(&self) -> Result<Vec<Server>> {
        let rows: Vec<ServerRow> =
            sqlx::query_as(&format!("{SELECT} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ServerRow::into_server).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<Server>> {
        let rows: Vec<ServerRow> =
            sqlx::query_as(&format!("{SELECT} WHERE enabled ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ServerRow::into_server).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Server>> {
        let row: Option<ServerRow> =
            sqlx::query_as(&format!("{SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ServerRow::into_server).transpose()
    }

    async fn create(&self, server: &Server) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO servers (id, name, kind, url, api_key, machine_id, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(server.id)
        .bind(&server.name)
        .bind(server.kind.as_str())
        .bind(&server.url)
        .bind(&server.api_key)
        .bind(&server.machine_id)
        .bind(server.enabled)
        .bind(server.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, server: &Server) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE servers
            SET name = $2, kind = $3, url = $4, api_key = $5,
                machine_id = $6, enabled = $7
            WHERE id = $1
            "#,
        )
        .bind(server.id)
        .bind(&server.name)
        .bind(server.kind.as_str())
        .bind(&server.url)
        .bind(&server.api_key)
        .bind(&server.machine_id)
        .bind(server.enabled)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!(
                "server {}",
                server.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("server {id}")));
        }
        Ok(())
    }
}
