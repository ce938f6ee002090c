//! The Notification Dispatcher (spec §4.6): picks the adapter for a
//! subscription's channel, dispatches, and folds the outcome back into the
//! subscription's lifecycle state via [`SubscriptionRegistry`].

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{EmailAdapter, NotificationAdapter, WebhookAdapter, ZulipAdapter};
use crate::bundle::build_notification_bundle;
use crate::types::NotificationKind;
use fhirkit_core::time::now_utc;
use fhirkit_subscriptions::{ChannelType, SubscriptionEvent, SubscriptionRegistry};

pub struct NotificationDispatcher {
    registry: Arc<SubscriptionRegistry>,
    webhook: WebhookAdapter,
    email: EmailAdapter,
    zulip: ZulipAdapter,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry, webhook: WebhookAdapter::new(), email: EmailAdapter::new(), zulip: ZulipAdapter::new() }
    }

    fn adapter_for(&self, channel_code: ChannelType) -> &dyn NotificationAdapter {
        match channel_code {
            ChannelType::RestHook => &self.webhook,
            ChannelType::Email => &self.email,
            ChannelType::Zulip => &self.zulip,
        }
    }

    /// Dispatches one or more events generated for `subscription_id` in a
    /// single notification (spec §3's `maxEventsPerNotification` caps how
    /// many a caller should batch here; batching itself is the caller's
    /// concern — the dispatcher just sends what it's given).
    pub async fn dispatch_events(&self, subscription_id: &str, events: Vec<SubscriptionEvent>) {
        self.dispatch(subscription_id, NotificationKind::EventNotification, events).await;
    }

    pub async fn dispatch_handshake(&self, subscription_id: &str) {
        self.dispatch(subscription_id, NotificationKind::Handshake, Vec::new()).await;
    }

    pub async fn dispatch_heartbeat(&self, subscription_id: &str) {
        self.dispatch(subscription_id, NotificationKind::Heartbeat, Vec::new()).await;
    }

    async fn dispatch(&self, subscription_id: &str, kind: NotificationKind, events: Vec<SubscriptionEvent>) {
        let Some(subscription) = self.registry.get(subscription_id) else { return };
        let payload = build_notification_bundle(&subscription, kind, &events);
        let adapter = self.adapter_for(subscription.channel.channel_code);

        let outcome = adapter.deliver(&subscription.channel, &payload).await;

        match outcome {
            Ok(result) if result.success => {
                info!(subscription_id, kind = kind.code(), "notification delivered");
                self.registry.record_delivery_success(subscription_id, now_utc());
            }
            Ok(result) => {
                let reason = result.error.unwrap_or_else(|| "delivery reported failure".to_string());
                warn!(subscription_id, kind = kind.code(), reason, "notification delivery failed");
                self.registry.record_delivery_failure(subscription_id, format!("{} {}", now_utc().inner(), reason));
            }
            Err(e) => {
                warn!(subscription_id, kind = kind.code(), error = %e, "notification delivery errored");
                self.registry.record_delivery_failure(subscription_id, format!("{} {}", now_utc().inner(), e));
            }
        }
    }
}
