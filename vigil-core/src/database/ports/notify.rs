use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use vigil_model::{NotificationChannel, PendingNotification};

#[async_trait]
pub trait ChannelRepository: Send + Sync {
    async fn create(&self, channel: &NotificationChannel) -> Result<()>;
    async fn update(&self, channel: &NotificationChannel) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<NotificationChannel>>;
    async fn list(&self) -> Result<Vec<NotificationChannel>>;
    async fn list_enabled(&self) -> Result<Vec<NotificationChannel>>;
}

#[async_trait]
pub trait NotificationQueueRepository: Send + Sync {
    /// Enqueue one delivery per channel. Pairs that already exist are left
    /// untouched, which is what makes redelivery idempotent.
    async fn enqueue(
        &self,
        violation_id: Uuid,
        channel_ids: &[Uuid],
    ) -> Result<()>;

    /// Pending deliveries for `channel_id` whose `next_attempt_at` has
    /// passed, oldest first.
    async fn due_for_channel(
        &self,
        channel_id: Uuid,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PendingNotification>>;

    async fn mark_delivered(&self, id: i64) -> Result<()>;

    /// Record a failed attempt. When `dead_letter` is set the entry leaves
    /// the pending pool for good.
    async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        dead_letter: bool,
    ) -> Result<()>;
}
