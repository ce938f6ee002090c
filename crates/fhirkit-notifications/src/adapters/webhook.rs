use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{is_shortcut_host, NotificationAdapter};
use crate::error::NotificationError;
use crate::types::{DeliveryOutcome, NotificationBundle};
use fhirkit_subscriptions::SubscriptionChannel;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// `rest-hook` channel: POSTs the serialized bundle with the subscription's
/// configured headers (spec §4.6).
pub struct WebhookAdapter {
    http_client: Client,
}

impl WebhookAdapter {
    pub fn new() -> Self {
        Self { http_client: Client::new() }
    }
}

impl Default for WebhookAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationAdapter for WebhookAdapter {
    async fn deliver(&self, channel: &SubscriptionChannel, payload: &NotificationBundle) -> Result<DeliveryOutcome, NotificationError> {
        let endpoint = channel.endpoint.as_ref().ok_or_else(|| NotificationError::InvalidConfig("rest-hook channel is missing endpoint".into()))?;

        if is_shortcut_host(endpoint) {
            return Ok(DeliveryOutcome::ok(Some(200)));
        }

        let mut request = self.http_client.post(endpoint).header("Content-Type", channel.content_type.clone()).timeout(DEFAULT_TIMEOUT);
        for (name, values) in &channel.parameters {
            for value in values {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        let response = request.json(&payload.bundle).send().await.map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let status = response.status();
        if matches!(status.as_u16(), 200 | 201 | 202 | 204) {
            Ok(DeliveryOutcome::ok(Some(status.as_u16())))
        } else {
            let body = response.text().await.unwrap_or_default();
            Ok(DeliveryOutcome::failed(format!("rest-hook delivery returned {status}: {body}")))
        }
    }
}
