use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{delivery_status, NotificationSender};
use crate::error::Result;
use vigil_model::{DiscordConfig, NotificationPayload, Severity};

pub struct DiscordSender {
    config: DiscordConfig,
    client: Client,
}

fn embed_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x3498db,
        Severity::Warning => 0xf39c12,
        Severity::Critical => 0xe74c3c,
    }
}

impl DiscordSender {
    pub fn new(config: DiscordConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationSender for DiscordSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let mut body = json!({
            "embeds": [{
                "title": format!(
                    "{} — {}",
                    payload.severity.to_string().to_uppercase(),
                    payload.rule_name
                ),
                "description": payload.message,
                "color": embed_color(payload.severity),
                "timestamp": payload.timestamp.to_rfc3339(),
                "fields": [
                    { "name": "User", "value": payload.user_name, "inline": true },
                    {
                        "name": "Confidence",
                        "value": format!("{:.0}%", payload.confidence),
                        "inline": true
                    }
                ]
            }]
        });
        if let Some(username) = &self.config.username {
            body["username"] = json!(username);
        }

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&body)
            .send()
            .await?;
        delivery_status(response)
    }
}
