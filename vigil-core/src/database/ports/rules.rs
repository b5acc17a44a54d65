use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use vigil_model::{Rule, RuleViolation};

#[async_trait]
pub trait SharingRuleRepository: Send + Sync {
    async fn create(&self, rule: &Rule) -> Result<()>;
    async fn update(&self, rule: &Rule) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Rule>>;
    async fn list(&self) -> Result<Vec<Rule>>;
    async fn list_enabled(&self) -> Result<Vec<Rule>>;
}

#[derive(Debug, Clone)]
pub struct ViolationPage {
    pub violations: Vec<RuleViolation>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[async_trait]
pub trait ViolationRepository: Send + Sync {
    async fn insert(&self, violation: &RuleViolation) -> Result<()>;

    /// The existing violation for `(rule_id, user)` inside the dedup
    /// bucket `[bucket_start, bucket_end)`, if one was already persisted.
    async fn find_in_bucket(
        &self,
        rule_id: Uuid,
        user_name: &str,
        bucket_start: DateTime<Utc>,
        bucket_end: DateTime<Utc>,
    ) -> Result<Option<RuleViolation>>;

    /// Merge a duplicate into the surviving record: keep the higher
    /// confidence and the union of details.
    async fn merge(
        &self,
        id: Uuid,
        confidence_score: f64,
        details: &Map<String, Value>,
    ) -> Result<()>;

    async fn list(
        &self,
        page: u32,
        per_page: u32,
        user_name: Option<&str>,
    ) -> Result<ViolationPage>;

    async fn get(&self, id: Uuid) -> Result<Option<RuleViolation>>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn count_since(&self, since: DateTime<Utc>) -> Result<i64>;
}
