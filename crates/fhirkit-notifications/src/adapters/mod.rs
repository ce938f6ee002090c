pub mod email;
pub mod webhook;
pub mod zulip;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::types::{DeliveryOutcome, NotificationBundle};
use fhirkit_subscriptions::SubscriptionChannel;

/// One channel's wire transport (spec §4.6: "rest-hook", "email", "zulip").
#[async_trait]
pub trait NotificationAdapter: Send + Sync {
    async fn deliver(&self, channel: &SubscriptionChannel, payload: &NotificationBundle) -> Result<DeliveryOutcome, NotificationError>;
}

pub use email::EmailAdapter;
pub use webhook::WebhookAdapter;
pub use zulip::ZulipAdapter;

/// Endpoints on this host are treated as a successful no-op delivery,
/// without producing any wire traffic (spec §4.6 "Shortcuts": used for tests
/// and samples).
pub fn is_shortcut_host(endpoint: &str) -> bool {
    reqwest::Url::parse(endpoint)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .map(|host| host == "example.org" || host.ends_with(".example.org"))
        .unwrap_or(false)
}
