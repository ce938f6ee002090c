//! Assembles the notification `Bundle` a channel adapter sends on the wire
//! (spec §4.6): a leading `SubscriptionStatus` entry, followed by event
//! content shaped by the subscription's `contentLevel`.

use crate::types::{NotificationBundle, NotificationKind};
use fhirkit_subscriptions::{ActiveSubscription, PayloadContent, SubscriptionEvent};
use serde_json::{json, Value};

fn status_resource(subscription: &ActiveSubscription, kind: NotificationKind, events: &[SubscriptionEvent]) -> Value {
    let notification_event: Vec<Value> = events
        .iter()
        .map(|event| {
            json!({
                "eventNumber": event.event_number.to_string(),
                "timestamp": event.timestamp.to_string(),
                "focus": { "reference": focus_reference(&event.focus) },
            })
        })
        .collect();

    json!({
        "resourceType": "SubscriptionStatus",
        "status": subscription_fhir_status(subscription),
        "type": kind.code(),
        "eventsSinceSubscriptionStart": subscription.current_event_count.to_string(),
        "notificationEvent": notification_event,
        "subscription": { "reference": format!("Subscription/{}", subscription.id) },
        "topic": subscription.topic_url,
        "errorCode": subscription.notification_errors.last().cloned().unwrap_or_default(),
    })
}

fn focus_reference(focus: &Value) -> String {
    let rt = focus.get("resourceType").and_then(Value::as_str).unwrap_or("Resource");
    let id = focus.get("id").and_then(Value::as_str).unwrap_or("unknown");
    format!("{rt}/{id}")
}

fn subscription_fhir_status(subscription: &ActiveSubscription) -> &'static str {
    use fhirkit_subscriptions::SubscriptionStatus as S;
    match subscription.status {
        S::Requested => "requested",
        S::Active => "active",
        S::Error => "error",
        S::Off => "off",
    }
}

/// Builds the Bundle to deliver for `events` (empty for handshake/heartbeat
/// notifications, which carry only the `SubscriptionStatus`).
pub fn build_notification_bundle(subscription: &ActiveSubscription, kind: NotificationKind, events: &[SubscriptionEvent]) -> NotificationBundle {
    let status = status_resource(subscription, kind, events);
    let mut entries = vec![json!({ "resource": status, "fullUrl": format!("urn:uuid:{}", uuid::Uuid::new_v4()) })];

    if !events.is_empty() {
        match subscription.content_level {
            PayloadContent::Empty => {}
            PayloadContent::IdOnly => {
                for event in events {
                    entries.push(json!({ "fullUrl": format!("urn:uuid:{}", uuid::Uuid::new_v4()), "resource": { "reference": focus_reference(&event.focus) } }));
                }
            }
            PayloadContent::FullResource => {
                for event in events {
                    entries.push(json!({ "fullUrl": format!("urn:uuid:{}", uuid::Uuid::new_v4()), "resource": event.focus }));
                    for additional in &event.additional_context {
                        entries.push(json!({ "fullUrl": format!("urn:uuid:{}", uuid::Uuid::new_v4()), "resource": additional }));
                    }
                }
            }
        }
    }

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "subscription-notification",
        "timestamp": fhirkit_core::time::now_utc().to_string(),
        "entry": entries,
    });

    let subject = match (kind, events.first(), events.last()) {
        (NotificationKind::EventNotification, Some(first), Some(last)) if events.len() > 1 => {
            format!("Subscription {} events {}-{}", subscription.id, first.event_number, last.event_number)
        }
        (NotificationKind::EventNotification, Some(first), _) => format!("Subscription {} event {}", subscription.id, first.event_number),
        (NotificationKind::Handshake, ..) => format!("Subscription {} handshake", subscription.id),
        (NotificationKind::Heartbeat, ..) => format!("Subscription {} heartbeat", subscription.id),
        (NotificationKind::QueryStatus, ..) => format!("Subscription {} status", subscription.id),
    };

    NotificationBundle { bundle, subject }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_subscriptions::{ChannelType, SubscriptionChannel};
    use serde_json::json;
    use std::collections::HashMap;

    fn sample_subscription() -> ActiveSubscription {
        let channel = SubscriptionChannel {
            channel_system: String::new(),
            channel_code: ChannelType::RestHook,
            endpoint: Some("https://example.org/hook".into()),
            parameters: HashMap::new(),
            heartbeat_seconds: None,
            timeout_seconds: None,
            content_type: "application/fhir+json".into(),
        };
        ActiveSubscription::new("sub1".into(), "http://example.org/topics/t1".into(), channel, PayloadContent::FullResource)
    }

    #[test]
    fn empty_content_level_omits_resource_entries() {
        let mut subscription = sample_subscription();
        subscription.content_level = PayloadContent::Empty;
        let event = SubscriptionEvent {
            subscription_id: subscription.id.clone(),
            topic_url: subscription.topic_url.clone(),
            event_number: 1,
            timestamp: fhirkit_core::time::now_utc(),
            status_at_generation: subscription.status,
            focus: json!({"resourceType": "Encounter", "id": "e1"}),
            additional_context: vec![],
        };
        let result = build_notification_bundle(&subscription, NotificationKind::EventNotification, &[event]);
        let entries = result.bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn full_resource_content_level_includes_focus_and_context() {
        let subscription = sample_subscription();
        let event = SubscriptionEvent {
            subscription_id: subscription.id.clone(),
            topic_url: subscription.topic_url.clone(),
            event_number: 1,
            timestamp: fhirkit_core::time::now_utc(),
            status_at_generation: subscription.status,
            focus: json!({"resourceType": "Encounter", "id": "e1"}),
            additional_context: vec![json!({"resourceType": "Patient", "id": "p1"})],
        };
        let result = build_notification_bundle(&subscription, NotificationKind::EventNotification, &[event]);
        let entries = result.bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn multi_event_subject_encodes_event_range() {
        let subscription = sample_subscription();
        let make_event = |n: u64| SubscriptionEvent {
            subscription_id: subscription.id.clone(),
            topic_url: subscription.topic_url.clone(),
            event_number: n,
            timestamp: fhirkit_core::time::now_utc(),
            status_at_generation: subscription.status,
            focus: json!({"resourceType": "Encounter", "id": format!("e{n}")}),
            additional_context: vec![],
        };
        let result = build_notification_bundle(&subscription, NotificationKind::EventNotification, &[make_event(3), make_event(4)]);
        assert_eq!(result.subject, "Subscription sub1 events 3-4");
    }
}
