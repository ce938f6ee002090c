//! Heartbeat scheduler (spec §4.6): every 2 seconds, scans every active
//! subscription with a configured heartbeat interval and enqueues a
//! heartbeat notification for any that are due.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::debug;

use crate::service::NotificationDispatcher;
use fhirkit_core::time::now_utc;
use fhirkit_subscriptions::SubscriptionRegistry;

const HEARTBEAT_SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Runs forever, scanning for due heartbeats; intended to be spawned as its
/// own task per tenant.
pub async fn run_heartbeat_scheduler(registry: Arc<SubscriptionRegistry>, dispatcher: Arc<NotificationDispatcher>) {
    let mut ticker = interval(HEARTBEAT_SCAN_INTERVAL);
    loop {
        ticker.tick().await;
        let due = registry.due_for_heartbeat(now_utc());
        if due.is_empty() {
            continue;
        }
        debug!(count = due.len(), "dispatching heartbeats");
        for subscription_id in due {
            dispatcher.dispatch_heartbeat(&subscription_id).await;
        }
    }
}
