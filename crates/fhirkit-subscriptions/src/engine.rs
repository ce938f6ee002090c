//! Ties the topic registry, trigger evaluation, and subscription registry
//! together: `process_write` is what a Resource Store write calls into
//! (spec §4.5's `TestCreateAgainstSubscriptions` / `TestUpdateAgainstSubscriptions`
//! / `TestDeleteAgainstSubscriptions`).

use crate::event_matcher::{filters_match, trigger_fires, WriteKind};
use crate::registry::SubscriptionRegistry;
use crate::topic_registry::TopicRegistry;
use crate::types::{NotificationShape, SubscriptionEvent};
use fhirkit_core::adapter::{TypedElement, VersionAdapter};
use fhirkit_core::reference::parse_reference;
use fhirkit_core::time::now_utc;
use fhirkit_search::IncludeSpec;
use fhirkit_store::registry::ResourceStoreRegistry;
use serde_json::Value;

/// Resolves a topic's `notificationShape` for `resource_type` against the
/// tenant's stores (spec §3, §4.5): `includes` follows references out of
/// `focus`, `revIncludes` scans the named store for resources that point
/// back at `focus`. Run once per event registration so the frozen snapshot
/// carries its additional context from the moment it was generated.
fn resolve_additional_context(
    adapter: &dyn VersionAdapter,
    store_registry: &ResourceStoreRegistry,
    shape: &NotificationShape,
    focus: &Value,
) -> Vec<Value> {
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        store_registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };

    let mut context = Vec::new();
    let focus_type = focus.get("resourceType").and_then(Value::as_str).unwrap_or_default();
    let focus_id = focus.get("id").and_then(Value::as_str).unwrap_or_default();
    let focus_reference = format!("{focus_type}/{focus_id}");
    let root = TypedElement::from_value(focus.clone());

    for raw in &shape.includes {
        let Some(include) = IncludeSpec::parse(raw) else { continue };
        let Some(store) = store_registry.get(&include.source_type) else { continue };
        let Some(def) = store.search_parameter(&include.param) else { continue };
        for element in adapter.evaluate_path(&root, &def.expression, &resolver) {
            let Some(reference_str) = adapter.extract_reference(&element) else { continue };
            let Ok(parsed_ref) = parse_reference(&reference_str, None) else { continue };
            if let Some(target) = &include.target_type {
                if &parsed_ref.resource_type != target {
                    continue;
                }
            }
            if let Some(target_store) = store_registry.get(&parsed_ref.resource_type) {
                if let Some(resolved) = target_store.instance_read(&parsed_ref.id) {
                    context.push(resolved.body);
                }
            }
        }
    }

    for raw in &shape.rev_includes {
        let Some(revinclude) = IncludeSpec::parse(raw) else { continue };
        let Some(referencing_store) = store_registry.get(&revinclude.source_type) else { continue };
        let Some(def) = referencing_store.search_parameter(&revinclude.param) else { continue };
        for candidate in referencing_store.all() {
            let candidate_root = TypedElement::from_value(candidate.body.clone());
            let elements = adapter.evaluate_path(&candidate_root, &def.expression, &resolver);
            let references_focus = elements.iter().any(|e| adapter.extract_reference(e).as_deref() == Some(focus_reference.as_str()));
            if references_focus {
                context.push(candidate.body);
            }
        }
    }

    context
}

/// Evaluates every registered topic's triggers for `resource_type` against
/// one write, and for each topic whose trigger fires, registers an event for
/// every active subscription on that topic whose filters also match. The
/// event's additional context is resolved against the store registry right
/// here, at registration time, so the snapshot is frozen alongside `focus`
/// rather than re-derived later against a store that may have moved on.
pub fn process_write(
    adapter: &dyn VersionAdapter,
    store_registry: &ResourceStoreRegistry,
    topics: &TopicRegistry,
    subscriptions: &SubscriptionRegistry,
    resource_type: &str,
    kind: WriteKind,
    previous: Option<&Value>,
    current: Option<&Value>,
) -> Vec<SubscriptionEvent> {
    let focus = current.or(previous).cloned().unwrap_or(Value::Null);
    let mut events = Vec::new();

    for topic in topics.active_topics() {
        let Some(triggers) = topic.resource_triggers.get(resource_type) else {
            continue;
        };
        let fired = triggers
            .iter()
            .any(|trigger| trigger_fires(adapter, store_registry, trigger, kind, previous, current));
        if !fired {
            continue;
        }

        let additional_context = topic
            .notification_shapes
            .get(resource_type)
            .map(|shape| resolve_additional_context(adapter, store_registry, shape, &focus))
            .unwrap_or_default();

        for subscription_id in subscriptions.active_ids_by_topic(&topic.url) {
            let Some(subscription) = subscriptions.get(&subscription_id) else { continue };
            let filters = subscription.filters.get(resource_type).cloned().unwrap_or_default();
            if !filters_match(adapter, store_registry, resource_type, &filters, &focus) {
                continue;
            }
            if let Some(event) = subscriptions.record_event(&subscription_id, focus.clone(), additional_context.clone(), now_utc()) {
                events.push(event);
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::parse_subscription;
    use crate::topic_registry::parse_subscription_topic;
    use fhirkit_core::adapter::JsonVersionAdapter;
    use fhirkit_core::events::EventBroadcaster;
    use fhirkit_core::tenant::FhirVersion;
    use serde_json::json;

    fn setup() -> (JsonVersionAdapter, ResourceStoreRegistry, TopicRegistry, SubscriptionRegistry) {
        let adapter = JsonVersionAdapter::new(FhirVersion::R5);
        let store_registry = ResourceStoreRegistry::new(EventBroadcaster::default(), None);
        let topics = TopicRegistry::new();
        let subscriptions = SubscriptionRegistry::new();

        let topic_body = json!({
            "id": "topic1",
            "url": "http://example.org/topics/encounter-finished",
            "status": "active",
            "resourceTrigger": [{
                "resource": "Encounter",
                "supportedInteraction": ["create", "update"],
                "fhirPathCriteria": "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')",
            }],
        });
        topics.register(parse_subscription_topic(&topic_body).unwrap());

        let sub_body = json!({
            "id": "sub1",
            "topic": "http://example.org/topics/encounter-finished",
            "channelType": {"system": "http://hl7.org/fhir/subscription-channel-type", "code": "rest-hook"},
            "endpoint": "https://example.org/hook",
            "content": "full-resource",
        });
        let mut sub = parse_subscription(&sub_body).unwrap();
        sub.status = crate::types::SubscriptionStatus::Active;
        subscriptions.register(sub);

        (adapter, store_registry, topics, subscriptions)
    }

    #[test]
    fn create_with_finished_status_generates_one_event() {
        let (adapter, store_registry, topics, subscriptions) = setup();
        let current = json!({"resourceType": "Encounter", "id": "e1", "status": "finished"});
        let events = process_write(
            &adapter,
            &store_registry,
            &topics,
            &subscriptions,
            "Encounter",
            WriteKind::Create,
            None,
            Some(&current),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_number, 1);
    }

    #[test]
    fn update_from_planned_to_finished_generates_one_event() {
        let (adapter, store_registry, topics, subscriptions) = setup();
        let previous = json!({"resourceType": "Encounter", "id": "e1", "status": "planned"});
        let current = json!({"resourceType": "Encounter", "id": "e1", "status": "finished"});
        let events = process_write(
            &adapter,
            &store_registry,
            &topics,
            &subscriptions,
            "Encounter",
            WriteKind::Update,
            Some(&previous),
            Some(&current),
        );
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn notification_shape_include_resolves_the_referenced_patient() {
        let (adapter, store_registry, topics, subscriptions) = setup();
        store_registry.get_or_create("Encounter").set_executable_search_parameter(fhirkit_store::search_param::SearchParamDefinition::new(
            "subject",
            "Encounter",
            fhirkit_store::search_param::SearchParamType::Reference,
            "Encounter.subject",
        ));
        let shape_body = json!({
            "id": "topic1",
            "url": "http://example.org/topics/encounter-finished",
            "status": "active",
            "resourceTrigger": [{
                "resource": "Encounter",
                "supportedInteraction": ["create", "update"],
                "fhirPathCriteria": "(%previous.empty() or (%previous.status!='finished')) and (%current.status='finished')",
            }],
            "notificationShape": [{
                "resource": "Encounter",
                "include": ["Encounter:subject"],
            }],
        });
        topics.register(parse_subscription_topic(&shape_body).unwrap());

        store_registry
            .get_or_create("Patient")
            .instance_create(Some("p1"), true, json!({"resourceType": "Patient", "id": "p1"}))
            .unwrap();

        let current = json!({
            "resourceType": "Encounter",
            "id": "e1",
            "status": "finished",
            "subject": {"reference": "Patient/p1"},
        });
        let events = process_write(
            &adapter,
            &store_registry,
            &topics,
            &subscriptions,
            "Encounter",
            WriteKind::Create,
            None,
            Some(&current),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].additional_context.len(), 1);
        assert_eq!(events[0].additional_context[0]["id"], "p1");
    }

    #[test]
    fn delete_of_finished_encounter_generates_no_event() {
        let (adapter, store_registry, topics, subscriptions) = setup();
        let previous = json!({"resourceType": "Encounter", "id": "e1", "status": "finished"});
        let events = process_write(
            &adapter,
            &store_registry,
            &topics,
            &subscriptions,
            "Encounter",
            WriteKind::Delete,
            Some(&previous),
            None,
        );
        assert_eq!(events.len(), 0);
    }
}
