use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use vigil_model::{GeoResult, HouseholdLocation};

#[async_trait]
pub trait GeoCacheRepository: Send + Sync {
    /// A cached lookup no older than `ttl`.
    async fn get_fresh(
        &self,
        ip: &str,
        ttl: Duration,
    ) -> Result<Option<GeoResult>>;

    async fn upsert(&self, result: &GeoResult) -> Result<()>;
}

/// One `(user, ip)` group aggregated from history, used when auto-learning
/// household locations.
#[derive(Debug, Clone)]
pub struct UserIpGroup {
    pub user_name: String,
    pub ip_address: String,
    pub session_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[async_trait]
pub trait HouseholdRepository: Send + Sync {
    async fn list_for_user(
        &self,
        user_name: &str,
    ) -> Result<Vec<HouseholdLocation>>;
    async fn list(&self) -> Result<Vec<HouseholdLocation>>;
    async fn get_by_user_ip(
        &self,
        user_name: &str,
        ip: &str,
    ) -> Result<Option<HouseholdLocation>>;
    async fn insert(&self, location: &HouseholdLocation) -> Result<()>;
    async fn touch(
        &self,
        id: Uuid,
        session_count: i64,
        last_seen: DateTime<Utc>,
    ) -> Result<()>;
    async fn set_trusted(&self, id: Uuid, trusted: bool) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// `(user, ip)` groups in history with at least `min_sessions` entries.
    async fn user_ip_groups(
        &self,
        min_sessions: i64,
    ) -> Result<Vec<UserIpGroup>>;
}
