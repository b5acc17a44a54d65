use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::ports::{
    SharingRuleRepository, ViolationPage, ViolationRepository,
};
use crate::error::{MonitorError, Result};
use vigil_model::{Rule, RuleType, RuleViolation, Severity};

#[derive(Debug, Clone)]
pub struct PostgresSharingRuleRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    rule_type: String,
    config: Value,
    enabled: bool,
    created_at: DateTime<Utc>,
}

impl RuleRow {
    fn into_rule(self) -> Result<Rule> {
        let rule_type: RuleType = self.rule_type.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "stored rule {} has unknown type {:?}",
                self.id, self.rule_type
            ))
        })?;
        Ok(Rule {
            id: self.id,
            name: self.name,
            rule_type,
            config: self.config,
            enabled: self.enabled,
            created_at: self.created_at,
        })
    }
}

const RULE_SELECT: &str = r#"
    SELECT id, name, rule_type, config, enabled, created_at
    FROM sharing_rules
"#;

impl PostgresSharingRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SharingRuleRepository for PostgresSharingRuleRepository {
    async fn create(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sharing_rules (id, name, rule_type, config, enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(&rule.config)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sharing_rules
            SET name = $2, rule_type = $3, config = $4, enabled = $5
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(rule.rule_type.as_str())
        .bind(&rule.config)
        .bind(rule.enabled)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM sharing_rules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("rule {id}")));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Rule>> {
        let row: Option<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(RuleRow::into_rule).transpose()
    }

    async fn list(&self) -> Result<Vec<Rule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<Rule>> {
        let rows: Vec<RuleRow> =
            sqlx::query_as(&format!("{RULE_SELECT} WHERE enabled ORDER BY name"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(RuleRow::into_rule).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresViolationRepository {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    id: Uuid,
    rule_id: Uuid,
    user_name: String,
    severity: String,
    message: String,
    details: Value,
    confidence_score: f64,
    occurred_at: DateTime<Utc>,
}

impl ViolationRow {
    fn into_violation(self) -> Result<RuleViolation> {
        let severity: Severity = self.severity.parse().map_err(|_| {
            MonitorError::Internal(format!(
                "stored violation {} has unknown severity {:?}",
                self.id, self.severity
            ))
        })?;
        let details = match self.details {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(RuleViolation {
            id: self.id,
            rule_id: self.rule_id,
            user_name: self.user_name,
            severity,
            message: self.message,
            details,
            confidence_score: self.confidence_score,
            occurred_at: self.occurred_at,
        })
    }
}

const VIOLATION_SELECT: &str = r#"
    SELECT id, rule_id, user_name, severity, message, details,
           confidence_score, occurred_at
    FROM rule_violations
"#;

impl PostgresViolationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ViolationRepository for PostgresViolationRepository {
    async fn insert(&self, violation: &RuleViolation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rule_violations
                (id, rule_id, user_name, severity, message, details,
                 confidence_score, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(violation.id)
        .bind(violation.rule_id)
        .bind(&violation.user_name)
        .bind(violation.severity.as_str())
        .bind(&violation.message)
        .bind(Value::Object(violation.details.clone()))
        .bind(violation.confidence_score)
        .bind(violation.occurred_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_in_bucket(
        &self,
        rule_id: Uuid,
        user_name: &str,
        bucket_start: DateTime<Utc>,
        bucket_end: DateTime<Utc>,
    ) -> Result<Option<RuleViolation>> {
        let row: Option<ViolationRow> = sqlx::query_as(&format!(
            r#"{VIOLATION_SELECT}
            WHERE rule_id = $1 AND user_name = $2
              AND occurred_at >= $3 AND occurred_at < $4
            ORDER BY occurred_at
            LIMIT 1"#
        ))
        .bind(rule_id)
        .bind(user_name)
        .bind(bucket_start)
        .bind(bucket_end)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ViolationRow::into_violation).transpose()
    }

    async fn merge(
        &self,
        id: Uuid,
        confidence_score: f64,
        details: &Map<String, Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rule_violations
            SET confidence_score = GREATEST(confidence_score, $2),
                details = details || $3::jsonb
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(confidence_score)
        .bind(Value::Object(details.clone()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        page: u32,
        per_page: u32,
        user_name: Option<&str>,
    ) -> Result<ViolationPage> {
        let per_page = per_page.clamp(1, 500);
        let page = page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM rule_violations
            WHERE ($1::text IS NULL OR user_name = $1)
            "#,
        )
        .bind(user_name)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<ViolationRow> = sqlx::query_as(&format!(
            r#"{VIOLATION_SELECT}
            WHERE ($1::text IS NULL OR user_name = $1)
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3"#
        ))
        .bind(user_name)
        .bind(i64::from(per_page))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ViolationPage {
            violations: rows
                .into_iter()
                .map(ViolationRow::into_violation)
                .collect::<Result<_>>()?,
            page,
            per_page,
            total,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<RuleViolation>> {
        let row: Option<ViolationRow> =
            sqlx::query_as(&format!("{VIOLATION_SELECT} WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ViolationRow::into_violation).transpose()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM rule_violations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MonitorError::not_found(format!("violation {id}")));
        }
        Ok(())
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM rule_violations WHERE occurred_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
