use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use vigil_model::{
    LibraryItemCache, MaintenanceCandidate, MaintenanceExclusion,
    MaintenanceRule,
};

/// A candidate joined with its cached item, as served to the UI.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub candidate: MaintenanceCandidate,
    pub item: LibraryItemCache,
}

#[derive(Debug, Clone)]
pub struct CandidatePage {
    pub rows: Vec<CandidateRow>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    async fn create_rule(&self, rule: &MaintenanceRule) -> Result<()>;
    async fn update_rule(&self, rule: &MaintenanceRule) -> Result<()>;
    async fn delete_rule(&self, id: Uuid) -> Result<()>;
    async fn get_rule(&self, id: Uuid) -> Result<Option<MaintenanceRule>>;
    async fn list_rules(&self) -> Result<Vec<MaintenanceRule>>;
    async fn list_enabled_rules(&self) -> Result<Vec<MaintenanceRule>>;

    /// Atomically replace the rule's candidate set: prior candidates are
    /// deleted and the new set inserted inside one transaction, so no
    /// reader observes a partial state.
    async fn replace_candidates(
        &self,
        rule_id: Uuid,
        candidates: &[MaintenanceCandidate],
    ) -> Result<()>;

    async fn candidates_page(
        &self,
        rule_id: Uuid,
        page: u32,
        per_page: u32,
    ) -> Result<CandidatePage>;

    async fn get_candidate(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<Option<MaintenanceCandidate>>;

    /// Remove the candidate row and its library-item cache row in one
    /// transaction, after a successful vendor delete.
    async fn delete_candidate_and_item(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<()>;

    async fn add_exclusion(
        &self,
        exclusion: &MaintenanceExclusion,
    ) -> Result<()>;
    async fn remove_exclusion(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<()>;
    async fn list_exclusions(
        &self,
        rule_id: Uuid,
    ) -> Result<Vec<MaintenanceExclusion>>;
    async fn is_excluded(
        &self,
        rule_id: Uuid,
        library_item_id: i64,
    ) -> Result<bool>;
}
