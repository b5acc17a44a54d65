use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::{
    CandidatePage, CandidateRow, MaintenanceRepository,
};
use crate::database::repositories::library_items::ItemRow;
use crate::error::{MonitorError, Result};
use vigil_model::{
    CriterionType, MaintenanceCandidate, MaintenanceExclusion,
    MaintenanceRule, MediaType, RuleLibraryScope,
};

/// Batch size for candidate inserts inside the replacement transaction.
const INSERT_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct PostgresMaintenanceRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    criterion_type: String,
    media_type: String,
    parameters: serde_json::Value,
    enabled: bool,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ScopeRow {
    rule_id: Uuid,
    server_id: Uuid,
    library_id: String,
}

#[derive(sqlx::FromRow)]
struct CandidateDbRow {
    rule_id: Uuid,
    library_item_id: i64,
    reason: String,
    computed_at: DateTime<Utc>,
    cross_server_count: i64,
}

impl CandidateDbRow {
    fn into_candidate(self) -> MaintenanceCandidate {
        MaintenanceCandidate {
            rule_id: self.rule_id,
            library_item_id: self.library_item_id,
            reason: self.reason,
            computed_at: self.computed_at,
            cross_server_count: self.cross_server_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ExclusionRow {
    rule_id: Uuid,
    library_item_id: i64,
    excluded_by: String,
    excluded_at: DateTime<Utc>,
}

fn assemble_rule(row: RuleRow, scopes: Vec<RuleLibraryScope>) -> Result<MaintenanceRule> {
    let criterion_type: CriterionType =
        row.criterion_type.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "maintenance rule {} has unknown criterion {:?}",
                row.id, row.criterion_type
            ))
        })?;
    let media_type: MediaType = row.media_type.parse().map_err(|_| {
        MonitorError::Internal(format!(
            "maintenance rule {} has unknown media type {:?}",
            row.id, row.media_type
        ))
    })?;
    Ok(MaintenanceRule {
        id: row.id,
        name: row.name,
        criterion_type,
        media_type,
        parameters: row.parameters,
        enabled: row.enabled,
        libraries: scopes,
        created_at: row.created_at,
    })
}

const RULE_SELECT: &str = r#"
    SELECT id, name, criterion_type, media_type, parameters, enabled,
           created_at
    FROM maintenance_rules
"#;

impl PostgresMaintenanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn scopes_for(&self, rule_ids: &[Uuid]) -> Result<Vec<ScopeRow>> {
        let rows: Vec<ScopeRow> = sqlx::query_as(
            r#"
            SELECT rule_id, server_id, library_id
            FROM maintenance_rule_libraries
            WHERE rule_id = ANY($1)
            "#,
        )
        .bind(rule_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_rules(&self, rows: Vec<RuleRow>) -> Result<Vec<MaintenanceRule>> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut scopes = self.scopes_for(&ids).await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let rule_scopes = scopes
                .extract_if(.., |s| s.rule_id == row.id)
                .map(|s| RuleLibraryScope {
                    server_id: s.server_id,
                    library_id: s.library_id,
                })
                .collect();
            rules.push(assemble_rule(row, rule_scopes)?);
        }
        Ok(rules)
    }
}

#[async_trait]
impl MaintenanceRepository for PostgresMaintenanceRepository {
    async fn create_rule(&self, rule: &MaintenanceRule) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO maintenance_rules
                (id, name, criterion_type, media_type, parameters, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.criterion_type.as_str())
        .bind(rule.media_type.as_str())
        .bind(&rule.parameters)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .execute(&mut *tx)
        .await?;
        for scope in &rule.libraries {
            sqlx::query(
                r#"
                INSERT INTO maintenance_rule_libraries (rule_id, server_id, library_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(rule.id)
            .bind(scope.server_id)
            .bind(&scope.library_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_rule(&self, rule: &MaintenanceRule) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE maintenance_rules
            SET name = $2, criterion_type = $3, media_type = $4,
                parameters = $5, enabled = $6
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.criterion_type.as_str())
        .bind(rule.media_type.as_str())
        .bind(&rule.parameters)
        .bind(rule.enabled)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("rule {}", rule.id)));
        }
        sqlx::query("DELETE FROM maintenance_rule_libraries WHERE rule_id = $1")
            .bind(rule.id)
            .execute(&mut *tx)
            .await?;
        for scope in &rule.libraries {
            sqlx::query(
                r#"
                INSERT INTO maintenance_rule_libraries (rule_id, server_id, library_id)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(rule.id)
            .bind(scope.server_id)
            .bind(&scope.library_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_rule(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM maintenance_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("rule {id}")));
        }
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<MaintenanceRule>> {
        let row: Option<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some(row) => Ok(self.load_rules(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_rules(&self) -> Result<Vec<MaintenanceRule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        self.load_rules(rows).await
    }

    async fn list_enabled_rules(&self) -> Result<Vec<MaintenanceRule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} WHERE enabled ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        self.load_rules(rows).await
    }

    async fn replace_candidates(
        &self,
        rule_id: Uuid,
        candidates: &[MaintenanceCandidate],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM maintenance_candidates WHERE rule_id = $1")
            .bind(rule_id)
            .execute(&mut *tx)
            .await?;
        for chunk in candidates.chunks(INSERT_BATCH) {
            for candidate in chunk {
                sqlx::query(
                    r#"
                    INSERT INTO maintenance_candidates
                        (rule_id, library_item_id, reason, computed_at, cross_server_count)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(candidate.rule_id)
                .bind(candidate.library_item_id)
                .bind(&candidate.reason)
                .bind(candidate.computed_at)
                .bind(candidate.cross_server_count)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn candidates_page(
        &self,
        rule_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<CandidatePage> {
        let per_page = per_page.clamp(1, 500);
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM maintenance_candidates WHERE rule_id = $1",
        )
        .bind(rule_id)
        .fetch_one(&self.pool)
        .await?;

        let candidate_rows: Vec<CandidateDbRow> = sqlx::query_as(
            r#"
            SELECT rule_id, library_item_id, reason, computed_at,
                   cross_server_count
            FROM maintenance_candidates
            WHERE rule_id = $1
            ORDER BY library_item_id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(rule_id)
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> =
            candidate_rows.iter().map(|c| c.library_item_id).collect();
        let item_rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "{} WHERE id = ANY($1)",
            crate::database::repositories::library_items::ITEM_SELECT
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut items = std::collections::HashMap::new();
        for row in item_rows {
            let item = row.into_item()?;
            items.insert(item.id, item);
        }

        let mut rows = Vec::with_capacity(candidate_rows.len());
        for row in candidate_rows {
            let candidate = row.into_candidate();
            // A cache row can vanish between the page query and the join
            // fetch; drop the orphan instead of failing the page.
            if let Some(item) = items.remove(&candidate.library_item_id) {
                rows.push(CandidateRow { candidate, item });
            }
        }

        Ok(CandidatePage {
            rows,
            page,
            per_page,
            total,
        })
    }

    async fn get_candidate(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<Option<MaintenanceCandidate>> {
        let row: Option<CandidateDbRow> = sqlx::query_as(
            r#"
            SELECT rule_id, library_item_id, reason, computed_at,
                   cross_server_count
            FROM maintenance_candidates
            WHERE rule_id = $1 AND library_item_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(library_item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CandidateDbRow::into_candidate))
    }

    async fn delete_candidate_and_item(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM maintenance_candidates
            WHERE rule_id = $1 AND library_item_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(library_item_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM library_items WHERE id = $1")
            .bind(library_item_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_exclusion(
        &self,
        exclusion: &MaintenanceExclusion,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO maintenance_exclusions
                (rule_id, library_item_id, excluded_by, excluded_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (rule_id, library_item_id) DO NOTHING
            "#,
        )
        .bind(exclusion.rule_id)
        .bind(exclusion.library_item_id)
        .bind(&exclusion.excluded_by)
        .bind(exclusion.excluded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_exclusion(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM maintenance_exclusions
            WHERE rule_id = $1 AND library_item_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(library_item_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_exclusions(
        &self,
        rule_id: Uuid,
    ) -> Result<Vec<MaintenanceExclusion>> {
        let rows: Vec<ExclusionRow> = sqlx::query_as(
            r#"
            SELECT rule_id, library_item_id, excluded_by, excluded_at
            FROM maintenance_exclusions
            WHERE rule_id = $1
            ORDER BY excluded_at DESC
            "#,
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| MaintenanceExclusion {
                rule_id: r.rule_id,
                library_item_id: r.library_item_id,
                excluded_by: r.excluded_by,
                excluded_at: r.excluded_at,
            })
            .collect())
    }

    async fn is_excluded(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM maintenance_exclusions
            WHERE rule_id = $1 AND library_item_id = $2
            "#,
        )
        .bind(rule_id)
        .bind(library_item_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}
