mod discord;
mod ntfy;
mod pushover;
mod webhook;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{MonitorError, Result};
use vigil_model::{ChannelKind, NotificationChannel, NotificationPayload};

pub use discord::DiscordSender;
pub use ntfy::NtfySender;
pub use pushover::PushoverSender;
pub use webhook::WebhookSender;

/// Transport for one channel kind. The dispatcher serialises the canonical
/// payload; each sender formats it for its endpoint.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Build the sender for `channel`, parsing its stored config strictly.
pub fn sender_for(
    channel: &NotificationChannel,
    client: Client,
) -> Result<Box<dyn NotificationSender>> {
    let invalid = |e: serde_json::Error| {
        MonitorError::internal(format!(
            "channel {} has invalid stored config: {e}",
            channel.id
        ))
    };
    Ok(match channel.kind {
        ChannelKind::Discord => Box::new(DiscordSender::new(
            serde_json::from_value(channel.config.clone()).map_err(invalid)?,
            client,
        )),
        ChannelKind::Webhook => Box::new(WebhookSender::new(
            serde_json::from_value(channel.config.clone()).map_err(invalid)?,
            client,
        )),
        ChannelKind::Pushover => Box::new(PushoverSender::new(
            serde_json::from_value(channel.config.clone()).map_err(invalid)?,
            client,
        )),
        ChannelKind::Ntfy => Box::new(NtfySender::new(
            serde_json::from_value(channel.config.clone()).map_err(invalid)?,
            client,
        )),
    })
}

/// Map a non-success transport status onto the canonical kinds; everything
/// retryable is `Transient`.
pub(crate) fn delivery_status(
    response: reqwest::Response,
) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
        return Err(MonitorError::transient(format!(
            "delivery endpoint returned {status}"
        )));
    }
    Err(MonitorError::internal(format!(
        "delivery endpoint returned {status}"
    )))
}
