use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;
use uuid::Uuid;

use crate::error::ModelError;
use crate::rules::Severity;

/// Transport kind of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Discord,
    Webhook,
    Pushover,
    Ntfy,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Discord => "discord",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Pushover => "pushover",
            ChannelKind::Ntfy => "ntfy",
        }
    }
}

impl Display for ChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(ChannelKind::Discord),
            "webhook" => Ok(ChannelKind::Webhook),
            "pushover" => Ok(ChannelKind::Pushover),
            "ntfy" => Ok(ChannelKind::Ntfy),
            other => Err(ModelError::UnknownVariant {
                kind: "channel kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Discord webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Generic webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub auth_header: Option<String>,
}

/// Pushover configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushoverConfig {
    pub app_token: String,
    pub user_key: String,
}

/// Ntfy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NtfyConfig {
    pub server_url: String,
    pub topic: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

fn require_http_url(url: &str, field: &str) -> Result<(), ModelError> {
    let parsed = Url::parse(url).map_err(|e| {
        ModelError::validation(format!("{field} is not a valid URL: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ModelError::validation(format!(
            "{field} must be http(s), got {other}"
        ))),
    }
}

/// Strictly parse `config` against the schema for `kind` and check the
/// transport-level requirements (URL scheme, required credentials).
pub fn validate_channel_config(
    kind: ChannelKind,
    config: &Value,
) -> Result<(), ModelError> {
    match kind {
        ChannelKind::Discord => {
            let parsed: DiscordConfig =
                serde_json::from_value(config.clone()).map_err(|e| {
                    ModelError::validation(format!("invalid discord config: {e}"))
                })?;
            require_http_url(&parsed.webhook_url, "webhook_url")
        }
        ChannelKind::Webhook => {
            let parsed: WebhookConfig = serde_json::from_value(config.clone())
                .map_err(|e| {
                    ModelError::validation(format!("invalid webhook config: {e}"))
                })?;
            require_http_url(&parsed.url, "url")
        }
        ChannelKind::Pushover => {
            let parsed: PushoverConfig =
                serde_json::from_value(config.clone()).map_err(|e| {
                    ModelError::validation(format!("invalid pushover config: {e}"))
                })?;
            if parsed.app_token.is_empty() || parsed.user_key.is_empty() {
                return Err(ModelError::validation(
                    "pushover requires app_token and user_key",
                ));
            }
            Ok(())
        }
        ChannelKind::Ntfy => {
            let parsed: NtfyConfig = serde_json::from_value(config.clone())
                .map_err(|e| {
                    ModelError::validation(format!("invalid ntfy config: {e}"))
                })?;
            require_http_url(&parsed.server_url, "server_url")?;
            if parsed.topic.is_empty() {
                return Err(ModelError::validation("ntfy requires a topic"));
            }
            Ok(())
        }
    }
}

/// A configured notification endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: Uuid,
    pub name: String,
    pub kind: ChannelKind,
    pub config: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl NotificationChannel {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(ModelError::validation(
                "channel name must be 1..=255 characters",
            ));
        }
        validate_channel_config(self.kind, &self.config)
    }
}

/// Canonical payload handed to every channel adapter for formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub violation_id: Uuid,
    pub rule_name: String,
    pub user_name: String,
    pub severity: Severity,
    pub confidence: f64,
    pub message: String,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Delivery state of one `(violation, channel)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
    DeadLettered,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::Delivered => "delivered",
            DeliveryState::DeadLettered => "dead_lettered",
        }
    }
}

impl FromStr for DeliveryState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryState::Pending),
            "delivered" => Ok(DeliveryState::Delivered),
            "dead_lettered" => Ok(DeliveryState::DeadLettered),
            other => Err(ModelError::UnknownVariant {
                kind: "delivery state",
                value: other.to_string(),
            }),
        }
    }
}

/// One queued outbound delivery, keyed `(violation_id, channel_id)` for
/// idempotency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotification {
    pub id: i64,
    pub violation_id: Uuid,
    pub channel_id: Uuid,
    pub state: DeliveryState,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discord_requires_http_url() {
        let ok = validate_channel_config(
            ChannelKind::Discord,
            &json!({ "webhook_url": "https://discord.com/api/webhooks/1/a" }),
        );
        assert!(ok.is_ok());

        let bad = validate_channel_config(
            ChannelKind::Discord,
            &json!({ "webhook_url": "ftp://example.com" }),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn pushover_requires_credentials() {
        let bad = validate_channel_config(
            ChannelKind::Pushover,
            &json!({ "app_token": "", "user_key": "u" }),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn unknown_config_fields_rejected() {
        let bad = validate_channel_config(
            ChannelKind::Ntfy,
            &json!({
                "server_url": "https://ntfy.sh",
                "topic": "vigil",
                "extra": 1
            }),
        );
        assert!(bad.is_err());
    }
}
