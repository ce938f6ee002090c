//! Subscription registry and lifecycle (spec §3, §4.5, §5): owns every
//! active subscription for a tenant and the event-numbering discipline.

use crate::types::{
    ActiveSubscription, ChannelType, PayloadContent, SubscriptionChannel, SubscriptionEvent, SubscriptionFilter, SubscriptionStatus,
};
use dashmap::DashMap;
use fhirkit_core::error::{CoreError, Result};
use fhirkit_core::time::FhirDateTime;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Parses a `Subscription` resource body into an [`ActiveSubscription`]
/// (spec §4.2's adapter capability, surfaced here as version-neutral JSON
/// shape parsing).
pub fn parse_subscription(body: &Value) -> Result<ActiveSubscription> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::parse("Subscription is missing id"))?
        .to_string();
    let topic_url = body
        .get("topic")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::parse("Subscription is missing topic"))?
        .to_string();

    let channel_obj = body.get("channelType").unwrap_or(&Value::Null);
    let channel_code = channel_obj
        .get("code")
        .and_then(Value::as_str)
        .and_then(ChannelType::from_code)
        .ok_or_else(|| CoreError::parse("Subscription channelType.code is missing or unrecognized"))?;
    let channel_system = channel_obj.get("system").and_then(Value::as_str).unwrap_or_default().to_string();

    let mut parameters: HashMap<String, Vec<String>> = HashMap::new();
    for param in body.get("parameter").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let Some(name) = param.get("name").and_then(Value::as_str) else { continue };
        let Some(value) = param.get("value").and_then(Value::as_str) else { continue };
        parameters.entry(name.to_string()).or_default().push(value.to_string());
    }

    let channel = SubscriptionChannel {
        channel_system,
        channel_code,
        endpoint: body.get("endpoint").and_then(Value::as_str).map(str::to_string),
        parameters,
        heartbeat_seconds: body.get("heartbeatPeriod").and_then(Value::as_u64),
        timeout_seconds: body.get("timeout").and_then(Value::as_u64),
        content_type: body.get("contentType").and_then(Value::as_str).unwrap_or("application/fhir+json").to_string(),
    };
    let content_level = PayloadContent::from_code(body.get("content").and_then(Value::as_str).unwrap_or("empty"));

    let mut subscription = ActiveSubscription::new(id, topic_url, channel, content_level);
    if let Some(max) = body.get("maxCount").and_then(Value::as_u64) {
        subscription.max_events_per_notification = max as usize;
    }

    for filter in body.get("filterBy").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let Some(resource_type) = filter.get("resourceType").and_then(Value::as_str) else { continue };
        let Some(name) = filter.get("filterParameter").and_then(Value::as_str) else { continue };
        let value = filter.get("value").and_then(Value::as_str).unwrap_or_default().to_string();
        let modifier = filter
            .get("modifier")
            .and_then(Value::as_str)
            .map(fhirkit_search::Modifier::parse)
            .unwrap_or(fhirkit_search::Modifier::None);
        let comparator = filter.get("comparator").and_then(Value::as_str).and_then(|c| fhirkit_search::Comparator::parse(c).0);
        subscription.filters.entry(resource_type.to_string()).or_default().push(SubscriptionFilter {
            name: name.to_string(),
            comparator,
            modifier,
            value,
        });
    }

    Ok(subscription)
}

/// Guards one subscription's mutable lifecycle state behind a single lock,
/// held across `increment → register` (spec §5) so event numbers stay
/// contiguous even under concurrent writes.
struct Slot {
    subscription: Mutex<ActiveSubscription>,
}

/// Per-tenant registry of active subscriptions (spec §4.7 composes one of
/// these alongside the Resource Stores and Topic Registry).
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: DashMap<String, Arc<Slot>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscription: ActiveSubscription) {
        self.subscriptions.insert(
            subscription.id.clone(),
            Arc::new(Slot {
                subscription: Mutex::new(subscription),
            }),
        );
    }

    pub fn remove(&self, id: &str) {
        self.subscriptions.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<ActiveSubscription> {
        self.subscriptions.get(id).map(|slot| slot.subscription.lock().unwrap().clone())
    }

    pub fn ids_by_topic(&self, topic_url: &str) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|e| e.subscription.lock().unwrap().topic_url == topic_url)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn active_ids_by_topic(&self, topic_url: &str) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|e| {
                let sub = e.subscription.lock().unwrap();
                sub.topic_url == topic_url && sub.status == SubscriptionStatus::Active
            })
            .map(|e| e.key().clone())
            .collect()
    }

    /// Handshake result transition: `requested → active` or `requested →
    /// error` (spec §4.5 lifecycle). Stamps `activatedAt` on success so the
    /// heartbeat scheduler has a grace-period baseline before the first
    /// communication (spec §4.6).
    pub fn complete_handshake(&self, id: &str, ok: bool, now: FhirDateTime) {
        if let Some(slot) = self.subscriptions.get(id) {
            let mut sub = slot.subscription.lock().unwrap();
            if ok {
                sub.status = SubscriptionStatus::Active;
                sub.activated_at = Some(now);
            } else {
                sub.status = SubscriptionStatus::Error;
            }
        }
    }

    pub fn set_off(&self, id: &str) {
        if let Some(slot) = self.subscriptions.get(id) {
            slot.subscription.lock().unwrap().status = SubscriptionStatus::Off;
        }
    }

    /// Atomically assigns the next `eventNumber`, builds the event, and
    /// registers it (spec §3, §4.5, §8 invariant 3: contiguous prefix of
    /// ℕ starting at 1). Duplicate re-registration of an existing number
    /// overwrites by design (spec §9, "deliberate idempotence window").
    pub fn record_event(
        &self,
        subscription_id: &str,
        focus: Value,
        additional_context: Vec<Value>,
        now: FhirDateTime,
    ) -> Option<SubscriptionEvent> {
        let slot = self.subscriptions.get(subscription_id)?.clone();
        let mut sub = slot.subscription.lock().unwrap();
        sub.current_event_count += 1;
        let event = SubscriptionEvent {
            subscription_id: subscription_id.to_string(),
            topic_url: sub.topic_url.clone(),
            event_number: sub.current_event_count,
            timestamp: now,
            status_at_generation: sub.status,
            focus,
            additional_context,
        };
        sub.generated_events.insert(event.event_number, event.clone());
        Some(event)
    }

    /// Records a successful delivery: resets the failure streak and, unless
    /// this was a heartbeat with no traffic, bumps `lastCommunicationTicks`
    /// (spec §4.6).
    pub fn record_delivery_success(&self, id: &str, now: FhirDateTime) {
        if let Some(slot) = self.subscriptions.get(id) {
            let mut sub = slot.subscription.lock().unwrap();
            sub.consecutive_failures = 0;
            sub.last_communication = Some(now);
        }
    }

    /// Records a failed delivery; three consecutive failures transition the
    /// subscription to `error` (spec §4.5, §4.6).
    pub fn record_delivery_failure(&self, id: &str, reason: String) {
        if let Some(slot) = self.subscriptions.get(id) {
            let mut sub = slot.subscription.lock().unwrap();
            sub.notification_errors.push(reason);
            sub.consecutive_failures += 1;
            if sub.consecutive_failures >= 3 {
                sub.status = SubscriptionStatus::Error;
            }
        }
    }

    /// Subscriptions due for a heartbeat (spec §4.6): active, with a
    /// positive `heartbeatSeconds`, where `now - lastCommunicationTicks ≥
    /// heartbeatSeconds`. A subscription that has never communicated uses
    /// `activatedAt` as its baseline instead, giving it one full interval of
    /// grace before its first heartbeat fires.
    pub fn due_for_heartbeat(&self, now: FhirDateTime) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|e| {
                let sub = e.subscription.lock().unwrap();
                if sub.status != SubscriptionStatus::Active {
                    return false;
                }
                let Some(interval) = sub.channel.heartbeat_seconds else { return false };
                let Some(baseline) = sub.last_communication.as_ref().or(sub.activated_at.as_ref()) else {
                    return false;
                };
                (*now.inner() - *baseline.inner()).whole_seconds() >= interval as i64
            })
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_core::time::now_utc;
    use serde_json::json;

    fn sample_subscription(id: &str) -> ActiveSubscription {
        let body = json!({
            "id": id,
            "topic": "http://example.org/topics/t1",
            "channelType": {"system": "http://hl7.org/fhir/subscription-channel-type", "code": "rest-hook"},
            "endpoint": "https://example.org/hook",
            "content": "full-resource",
            "heartbeatPeriod": 2,
        });
        parse_subscription(&body).unwrap()
    }

    #[test]
    fn event_numbers_are_contiguous_and_start_at_one() {
        let registry = SubscriptionRegistry::new();
        registry.register(sample_subscription("s1"));
        let e1 = registry.record_event("s1", json!({}), vec![], now_utc()).unwrap();
        let e2 = registry.record_event("s1", json!({}), vec![], now_utc()).unwrap();
        assert_eq!(e1.event_number, 1);
        assert_eq!(e2.event_number, 2);
    }

    #[test]
    fn three_consecutive_failures_trip_to_error() {
        let registry = SubscriptionRegistry::new();
        registry.register(sample_subscription("s1"));
        registry.complete_handshake("s1", true, now_utc());
        registry.record_delivery_failure("s1", "timeout".into());
        registry.record_delivery_failure("s1", "timeout".into());
        assert_eq!(registry.get("s1").unwrap().status, SubscriptionStatus::Active);
        registry.record_delivery_failure("s1", "timeout".into());
        assert_eq!(registry.get("s1").unwrap().status, SubscriptionStatus::Error);
    }

    #[test]
    fn success_resets_failure_streak() {
        let registry = SubscriptionRegistry::new();
        registry.register(sample_subscription("s1"));
        registry.record_delivery_failure("s1", "timeout".into());
        registry.record_delivery_failure("s1", "timeout".into());
        registry.record_delivery_success("s1", now_utc());
        registry.record_delivery_failure("s1", "timeout".into());
        registry.record_delivery_failure("s1", "timeout".into());
        assert_eq!(registry.get("s1").unwrap().status, SubscriptionStatus::Requested);
    }

    #[test]
    fn never_communicated_subscription_waits_one_interval_from_activation() {
        let registry = SubscriptionRegistry::new();
        registry.register(sample_subscription("s1"));
        let t0 = now_utc();
        registry.complete_handshake("s1", true, t0);

        assert!(registry.due_for_heartbeat(t0).is_empty());

        let later = FhirDateTime::new(*t0.inner() + time::Duration::seconds(3));
        assert_eq!(registry.due_for_heartbeat(later), vec!["s1".to_string()]);
    }
}
