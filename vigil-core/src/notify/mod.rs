pub mod channels;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::ports::{
    ChannelRepository, NotificationQueueRepository, SharingRuleRepository,
    ViolationRepository,
};
use crate::error::Result;
use channels::sender_for;
use vigil_config::NotifyConfig;
use vigil_model::{
    NotificationChannel, NotificationPayload, PendingNotification, Severity,
};

/// Deliveries picked up per channel per sweep.
const SWEEP_BATCH: i64 = 50;

/// Queue-backed delivery with per-channel retry.
///
/// Each sweep fetches the enabled channels and drains their due entries in
/// one independent task per channel. Failures back off exponentially with
/// jitter; after `max_attempts` an entry dead-letters and leaves the pool.
pub struct NotificationDispatcher {
    queue: Arc<dyn NotificationQueueRepository>,
    channels: Arc<dyn ChannelRepository>,
    violations: Arc<dyn ViolationRepository>,
    rules: Arc<dyn SharingRuleRepository>,
    client: Client,
    config: NotifyConfig,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueueRepository>,
        channels: Arc<dyn ChannelRepository>,
        violations: Arc<dyn ViolationRepository>,
        rules: Arc<dyn SharingRuleRepository>,
        client: Client,
        config: NotifyConfig,
    ) -> Self {
        Self {
            queue,
            channels,
            violations,
            rules,
            client,
            config,
        }
    }

    /// Retry-sweep loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.sweep().await {
                warn!("notification sweep failed: {e}");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }
        info!("notification dispatcher stopped");
    }

    /// One pass over every enabled channel, channels in parallel.
    pub async fn sweep(&self) -> Result<()> {
        let channels = self.channels.list_enabled().await?;
        let mut tasks = Vec::with_capacity(channels.len());
        for channel in channels {
            tasks.push(async move {
                if let Err(e) = self.sweep_channel(&channel).await {
                    warn!(channel = %channel.name, "channel sweep failed: {e}");
                }
            });
        }
        futures::future::join_all(tasks).await;
        Ok(())
    }

    async fn sweep_channel(&self, channel: &NotificationChannel) -> Result<()> {
        let due = self
            .queue
            .due_for_channel(channel.id, Utc::now(), SWEEP_BATCH)
            .await?;
        if due.is_empty() {
            return Ok(());
        }
        let sender = sender_for(channel, self.client.clone())?;

        for pending in due {
            let Some(payload) =
                self.build_payload(pending.violation_id).await?
            else {
                // The violation was deleted; nothing left to deliver.
                self.queue.mark_delivered(pending.id).await?;
                continue;
            };

            match sender.send(&payload).await {
                Ok(()) => {
                    self.queue.mark_delivered(pending.id).await?;
                    debug!(
                        channel = %channel.name,
                        violation = %pending.violation_id,
                        "notification delivered"
                    );
                }
                Err(e) => {
                    self.handle_failure(&pending, channel, &e.to_string())
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        pending: &PendingNotification,
        channel: &NotificationChannel,
        error: &str,
    ) -> Result<()> {
        let attempts_made = pending.attempts as u32 + 1;
        let dead_letter = attempts_made >= self.config.max_attempts;
        let next_attempt_at =
            Utc::now() + self.retry_delay(attempts_made);
        if dead_letter {
            warn!(
                channel = %channel.name,
                violation = %pending.violation_id,
                attempts = attempts_made,
                "notification dead-lettered: {error}"
            );
        }
        self.queue
            .record_failure(pending.id, error, next_attempt_at, dead_letter)
            .await?;
        Ok(())
    }

    /// Exponential backoff with up to 50% jitter on top.
    fn retry_delay(&self, attempts_made: u32) -> chrono::Duration {
        let exponent = attempts_made.saturating_sub(1).min(10);
        let base = self
            .config
            .retry_base
            .saturating_mul(2u32.saturating_pow(exponent));
        let jitter = rand::rng().random_range(0.0..=0.5);
        let with_jitter = base.mul_f64(1.0 + jitter);
        chrono::Duration::from_std(with_jitter)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
    }

    async fn build_payload(
        &self,
        violation_id: Uuid,
    ) -> Result<Option<NotificationPayload>> {
        let Some(violation) = self.violations.get(violation_id).await? else {
            return Ok(None);
        };
        let rule_name = self
            .rules
            .get(violation.rule_id)
            .await?
            .map(|rule| rule.name)
            .unwrap_or_else(|| "deleted rule".to_string());
        Ok(Some(NotificationPayload {
            violation_id: violation.id,
            rule_name,
            user_name: violation.user_name,
            severity: violation.severity,
            confidence: violation.confidence_score,
            message: violation.message,
            details: violation.details,
            timestamp: violation.occurred_at,
        }))
    }

    /// Synthesize a test delivery through `channel` without touching the
    /// queue. Used by the admin surface.
    pub async fn send_test(&self, channel: &NotificationChannel) -> Result<()> {
        let sender = sender_for(channel, self.client.clone())?;
        let payload = NotificationPayload {
            violation_id: Uuid::new_v4(),
            rule_name: "test".to_string(),
            user_name: "vigil".to_string(),
            severity: Severity::Info,
            confidence: 0.0,
            message: format!("Test notification for channel {}", channel.name),
            details: serde_json::Map::new(),
            timestamp: Utc::now(),
        };
        sender.send(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(config: NotifyConfig) -> NotificationDispatcher {
        struct Never;

        #[async_trait::async_trait]
        impl NotificationQueueRepository for Never {
            async fn enqueue(&self, _v: Uuid, _c: &[Uuid]) -> Result<()> {
                Ok(())
            }
            async fn due_for_channel(
                &self,
                _channel_id: Uuid,
                _now: chrono::DateTime<Utc>,
                _limit: i64,
            ) -> Result<Vec<PendingNotification>> {
                Ok(Vec::new())
            }
            async fn mark_delivered(&self, _id: i64) -> Result<()> {
                Ok(())
            }
            async fn record_failure(
                &self,
                _id: i64,
                _error: &str,
                _next: chrono::DateTime<Utc>,
                _dead: bool,
            ) -> Result<()> {
                Ok(())
            }
        }

        struct NoChannels;

        #[async_trait::async_trait]
        impl ChannelRepository for NoChannels {
            async fn create(&self, _c: &NotificationChannel) -> Result<()> {
                Ok(())
            }
            async fn update(&self, _c: &NotificationChannel) -> Result<()> {
                Ok(())
            }
            async fn delete(&self, _id: Uuid) -> Result<()> {
                Ok(())
            }
            async fn get(
                &self,
                _id: Uuid,
            ) -> Result<Option<NotificationChannel>> {
                Ok(None)
            }
            async fn list(&self) -> Result<Vec<NotificationChannel>> {
                Ok(Vec::new())
            }
            async fn list_enabled(&self) -> Result<Vec<NotificationChannel>> {
                Ok(Vec::new())
            }
        }

        struct NoViolations;

        #[async_trait::async_trait]
        impl ViolationRepository for NoViolations {
            async fn insert(
                &self,
                _v: &vigil_model::RuleViolation,
            ) -> Result<()> {
                Ok(())
            }
            async fn find_in_bucket(
                &self,
                _r: Uuid,
                _u: &str,
                _s: chrono::DateTime<Utc>,
                _e: chrono::DateTime<Utc>,
            ) -> Result<Option<vigil_model::RuleViolation>> {
                Ok(None)
            }
            async fn merge(
                &self,
                _id: Uuid,
                _c: f64,
                _d: &serde_json::Map<String, serde_json::Value>,
            ) -> Result<()> {
                Ok(())
            }
            async fn list(
                &self,
                _p: u32,
                _pp: u32,
                _u: Option<&str>,
            ) -> Result<crate::database::ports::ViolationPage> {
                unimplemented!()
            }
            async fn get(
                &self,
                _id: Uuid,
            ) -> Result<Option<vigil_model::RuleViolation>> {
                Ok(None)
            }
            async fn delete(&self, _id: Uuid) -> Result<()> {
                Ok(())
            }
            async fn count_since(
                &self,
                _s: chrono::DateTime<Utc>,
            ) -> Result<i64> {
                Ok(0)
            }
        }

        struct NoRules;

        #[async_trait::async_trait]
        impl SharingRuleRepository for NoRules {
            async fn create(&self, _r: &vigil_model::Rule) -> Result<()> {
                Ok(())
            }
            async fn update(&self, _r: &vigil_model::Rule) -> Result<()> {
                Ok(())
            }
            async fn delete(&self, _id: Uuid) -> Result<()> {
                Ok(())
            }
            async fn get(
                &self,
                _id: Uuid,
            ) -> Result<Option<vigil_model::Rule>> {
                Ok(None)
            }
            async fn list(&self) -> Result<Vec<vigil_model::Rule>> {
                Ok(Vec::new())
            }
            async fn list_enabled(&self) -> Result<Vec<vigil_model::Rule>> {
                Ok(Vec::new())
            }
        }

        NotificationDispatcher::new(
            Arc::new(Never),
            Arc::new(NoChannels),
            Arc::new(NoViolations),
            Arc::new(NoRules),
            Client::new(),
            config,
        )
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let dispatcher = dispatcher(NotifyConfig {
            max_attempts: 5,
            retry_base: Duration::from_secs(30),
            retry_interval: Duration::from_secs(60),
        });
        let first = dispatcher.retry_delay(1);
        let third = dispatcher.retry_delay(3);

        // Jitter is at most +50%.
        assert!(first >= chrono::Duration::seconds(30));
        assert!(first <= chrono::Duration::seconds(45));
        assert!(third >= chrono::Duration::seconds(120));
        assert!(third <= chrono::Duration::seconds(180));
    }

    #[tokio::test]
    async fn empty_sweep_is_clean() {
        let dispatcher = dispatcher(NotifyConfig::default());
        dispatcher.sweep().await.unwrap();
    }
}
