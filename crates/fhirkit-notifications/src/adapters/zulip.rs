use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{is_shortcut_host, NotificationAdapter};
use crate::error::NotificationError;
use crate::types::{DeliveryOutcome, NotificationBundle};
use fhirkit_subscriptions::SubscriptionChannel;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// `zulip` channel: stream vs private is selected by the presence of
/// `streamId`/`userId` channel parameters (spec §4.6).
pub struct ZulipAdapter {
    http_client: Client,
}

impl ZulipAdapter {
    pub fn new() -> Self {
        Self { http_client: Client::new() }
    }
}

impl Default for ZulipAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationAdapter for ZulipAdapter {
    async fn deliver(&self, channel: &SubscriptionChannel, payload: &NotificationBundle) -> Result<DeliveryOutcome, NotificationError> {
        let site_url = channel.endpoint.as_ref().ok_or_else(|| NotificationError::InvalidConfig("zulip channel is missing endpoint".into()))?;

        if is_shortcut_host(site_url) {
            return Ok(DeliveryOutcome::ok(Some(200)));
        }

        let bot_email = channel.parameters.get("bot-email").and_then(|v| v.first()).ok_or_else(|| NotificationError::InvalidConfig("zulip channel is missing bot-email".into()))?;
        let bot_api_key = channel.parameters.get("bot-api-key").and_then(|v| v.first()).ok_or_else(|| NotificationError::InvalidConfig("zulip channel is missing bot-api-key".into()))?;

        let content = serde_json::to_string_pretty(&payload.bundle).map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let mut form = vec![("content".to_string(), content)];
        if let Some(stream_id) = channel.parameters.get("streamId").and_then(|v| v.first()) {
            form.push(("type".to_string(), "stream".to_string()));
            form.push(("to".to_string(), stream_id.clone()));
            form.push(("topic".to_string(), payload.subject.clone()));
        } else if let Some(user_id) = channel.parameters.get("userId").and_then(|v| v.first()) {
            form.push(("type".to_string(), "private".to_string()));
            form.push(("to".to_string(), user_id.clone()));
        } else {
            return Err(NotificationError::InvalidConfig("zulip channel has neither streamId nor userId".into()));
        }

        let url = format!("{}/api/v1/messages", site_url.trim_end_matches('/'));
        let response = self
            .http_client
            .post(&url)
            .basic_auth(bot_email, Some(bot_api_key))
            .form(&form)
            .timeout(DEFAULT_TIMEOUT)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        if response.status().is_success() {
            Ok(DeliveryOutcome::ok(Some(response.status().as_u16())))
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(DeliveryOutcome::failed(format!("zulip delivery failed: {body}")))
        }
    }
}
