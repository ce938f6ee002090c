//! Parses FHIR `SubscriptionTopic` resources into [`ParsedSubscriptionTopic`]
//! and holds the per-tenant registry of them, keyed by canonical url.

use crate::types::{
    AllowedFilter, NotificationShape, ParsedSubscriptionTopic, QueryCriteria, QueryResultBehavior, ResourceTrigger, TopicStatus,
};
use dashmap::DashMap;
use fhirkit_core::error::{CoreError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

fn parse_result_behavior(raw: Option<&str>) -> QueryResultBehavior {
    match raw {
        Some("test-passes") => QueryResultBehavior::TestPasses,
        Some("test-fails") => QueryResultBehavior::TestFails,
        Some("no-test") => QueryResultBehavior::NoTest,
        _ => QueryResultBehavior::TestPasses,
    }
}

fn parse_resource_trigger(trigger: &Value) -> Option<ResourceTrigger> {
    let resource_type = trigger.get("resource").and_then(Value::as_str)?.to_string();
    let interactions: Vec<String> = trigger
        .get("supportedInteraction")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let query_criteria = trigger.get("queryCriteria").map(|qc| QueryCriteria {
        previous: qc.get("previous").and_then(Value::as_str).map(str::to_string),
        current: qc.get("current").and_then(Value::as_str).map(str::to_string),
        require_both: qc.get("requireBoth").and_then(Value::as_bool).unwrap_or(false),
        result_for_create: parse_result_behavior(qc.get("resultForCreate").and_then(Value::as_str)),
        result_for_delete: parse_result_behavior(qc.get("resultForDelete").and_then(Value::as_str)),
    });

    Some(ResourceTrigger {
        resource_type,
        on_create: interactions.iter().any(|i| i == "create"),
        on_update: interactions.iter().any(|i| i == "update"),
        on_delete: interactions.iter().any(|i| i == "delete"),
        require_both_queries: query_criteria.as_ref().map(|q| q.require_both).unwrap_or(false),
        query_criteria,
        create_auto_pass: trigger.get("createAutoPass").and_then(Value::as_bool).unwrap_or(false),
        create_auto_fail: trigger.get("createAutoFail").and_then(Value::as_bool).unwrap_or(false),
        delete_auto_pass: trigger.get("deleteAutoPass").and_then(Value::as_bool).unwrap_or(false),
        delete_auto_fail: trigger.get("deleteAutoFail").and_then(Value::as_bool).unwrap_or(false),
        fhir_path_criteria: trigger.get("fhirPathCriteria").and_then(Value::as_str).map(str::to_string),
    })
}

/// Parses a `SubscriptionTopic` resource body (spec §4.2's adapter
/// capability, surfaced here since the shape is version-neutral JSON).
pub fn parse_subscription_topic(body: &Value) -> Result<ParsedSubscriptionTopic> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::parse("SubscriptionTopic is missing id"))?
        .to_string();
    let url = body
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::parse("SubscriptionTopic is missing url"))?
        .to_string();
    let status = TopicStatus::from(body.get("status").and_then(Value::as_str).unwrap_or("unknown"));

    let mut resource_triggers: HashMap<String, Vec<ResourceTrigger>> = HashMap::new();
    for trigger_value in body.get("resourceTrigger").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        if let Some(trigger) = parse_resource_trigger(trigger_value) {
            resource_triggers.entry(trigger.resource_type.clone()).or_default().push(trigger);
        }
    }

    let mut allowed_filters: HashMap<String, Vec<AllowedFilter>> = HashMap::new();
    for cf in body.get("canFilterBy").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let Some(resource_type) = cf.get("resource").and_then(Value::as_str) else { continue };
        let Some(filter_parameter) = cf.get("filterParameter").and_then(Value::as_str) else { continue };
        allowed_filters.entry(resource_type.to_string()).or_default().push(AllowedFilter {
            resource_type: resource_type.to_string(),
            filter_parameter: filter_parameter.to_string(),
        });
    }

    let mut notification_shapes: HashMap<String, NotificationShape> = HashMap::new();
    for shape in body.get("notificationShape").and_then(Value::as_array).unwrap_or(&Vec::new()) {
        let Some(resource_type) = shape.get("resource").and_then(Value::as_str) else { continue };
        let includes = shape
            .get("include")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let rev_includes = shape
            .get("revInclude")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        notification_shapes.insert(
            resource_type.to_string(),
            NotificationShape {
                resource_type: resource_type.to_string(),
                includes,
                rev_includes,
            },
        );
    }

    Ok(ParsedSubscriptionTopic {
        id,
        url,
        status,
        resource_triggers,
        allowed_filters,
        notification_shapes,
    })
}

/// Holds every registered topic for one tenant, keyed by canonical url.
#[derive(Default)]
pub struct TopicRegistry {
    topics: DashMap<String, Arc<ParsedSubscriptionTopic>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, topic: ParsedSubscriptionTopic) {
        self.topics.insert(topic.url.clone(), Arc::new(topic));
    }

    pub fn remove(&self, url: &str) {
        self.topics.remove(url);
    }

    pub fn get(&self, url: &str) -> Option<Arc<ParsedSubscriptionTopic>> {
        self.topics.get(url).map(|e| e.clone())
    }

    pub fn active_topics(&self) -> Vec<Arc<ParsedSubscriptionTopic>> {
        self.topics
            .iter()
            .map(|e| e.value().clone())
            .filter(|t| t.status == TopicStatus::Active)
            .collect()
    }
}
