use async_trait::async_trait;
use lettre::{message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::{is_shortcut_host, NotificationAdapter};
use crate::error::NotificationError;
use crate::types::{DeliveryOutcome, NotificationBundle};
use fhirkit_subscriptions::SubscriptionChannel;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// `email` channel: attaches the bundle to an SMTP message whose subject
/// encodes the event range (spec §4.6).
pub struct EmailAdapter;

impl EmailAdapter {
    pub fn new() -> Self {
        Self
    }

    fn recipient<'a>(&self, channel: &'a SubscriptionChannel) -> Option<&'a str> {
        channel.endpoint.as_deref().and_then(|e| e.strip_prefix("mailto:")).or_else(|| channel.parameters.get("to").and_then(|v| v.first()).map(String::as_str))
    }
}

impl Default for EmailAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationAdapter for EmailAdapter {
    async fn deliver(&self, channel: &SubscriptionChannel, payload: &NotificationBundle) -> Result<DeliveryOutcome, NotificationError> {
        let to = self.recipient(channel).ok_or_else(|| NotificationError::InvalidConfig("email channel has no recipient".into()))?;

        if channel.endpoint.as_deref().map(is_shortcut_host).unwrap_or(false) {
            return Ok(DeliveryOutcome::ok(None));
        }

        let from = channel.parameters.get("from").and_then(|v| v.first()).cloned().unwrap_or_else(|| "subscriptions@fhirkit.invalid".to_string());
        let smtp_host = channel.parameters.get("smtp-host").and_then(|v| v.first()).cloned().unwrap_or_else(|| "localhost".to_string());

        let body = serde_json::to_string_pretty(&payload.bundle).map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let email = Message::builder()
            .from(from.parse().map_err(|e| NotificationError::InvalidConfig(format!("invalid from address: {e}")))?)
            .to(to.parse().map_err(|e| NotificationError::InvalidConfig(format!("invalid recipient address: {e}")))?)
            .subject(&payload.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotificationError::SendFailed(e.to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_host).map_err(|e| NotificationError::InvalidConfig(e.to_string()))?.timeout(Some(DEFAULT_TIMEOUT));
        if let (Some(user), Some(pass)) = (
            channel.parameters.get("smtp-username").and_then(|v| v.first()),
            channel.parameters.get("smtp-password").and_then(|v| v.first()),
        ) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        match builder.build().send(email).await {
            Ok(_) => Ok(DeliveryOutcome::ok(None)),
            Err(e) => Ok(DeliveryOutcome::failed(e.to_string())),
        }
    }
}
