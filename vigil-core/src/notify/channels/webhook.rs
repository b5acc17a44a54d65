use async_trait::async_trait;
use reqwest::Client;

use super::{delivery_status, NotificationSender};
use crate::error::Result;
use vigil_model::{NotificationPayload, WebhookConfig};

/// Generic JSON webhook: the canonical payload is POSTed verbatim.
pub struct WebhookSender {
    config: WebhookConfig,
    client: Client,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig, client: Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<()> {
        let mut request = self.client.post(&self.config.url).json(payload);
        if let Some(auth) = &self.config.auth_header {
            request = request.header("Authorization", auth);
        }
        let response = request.send().await?;
        delivery_status(response)
    }
}
