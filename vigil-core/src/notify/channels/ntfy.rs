use async_trait::async_trait;
use reqwest::Client;

use super::{delivery_status, NotificationSender};
use crate::error::Result;
use vigil_model::{NotificationPayload, NtfyConfig, Severity};

pub struct NtfySender {
    config: NtfyConfig,
    client: Client,
}

fn priority(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "2",
        Severity::Warning => "3",
        Severity::Critical => "5",
    }
}

impl NtfySender {
    pub fn new(config: NtfyConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationSender for NtfySender {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.config.server_url.trim_end_matches('/'),
            self.config.topic
        );
        let mut request = self
            .client
            .post(url)
            .header("Title", format!("Vigil: {}", payload.rule_name))
            .header("Priority", priority(payload.severity))
            .header("Tags", payload.severity.as_str())
            .body(payload.message.clone());
        if let Some(token) = &self.config.access_token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await?;
        delivery_status(response)
    }
}
