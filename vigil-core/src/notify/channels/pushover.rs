use async_trait::async_trait;
use reqwest::Client;

use super::{delivery_status, NotificationSender};
use crate::error::Result;
use vigil_model::{NotificationPayload, PushoverConfig, Severity};

const API_URL: &str = "https://api.pushover.net/1/messages.json";

pub struct PushoverSender {
    config: PushoverConfig,
    client: Client,
}

fn priority(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "-1",
        Severity::Warning => "0",
        Severity::Critical => "1",
    }
}

impl PushoverSender {
    pub fn new(config: PushoverConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationSender for PushoverSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let title = format!("Vigil: {}", payload.rule_name);
        let form = [
            ("token", self.config.app_token.as_str()),
            ("user", self.config.user_key.as_str()),
            ("title", title.as_str()),
            ("message", payload.message.as_str()),
            ("priority", priority(payload.severity)),
        ];
        let response = self.client.post(API_URL).form(&form).send().await?;
        delivery_status(response)
    }
}
