//! Core types for the topic-based subscription engine (spec §3, §4.5).

use fhirkit_core::time::FhirDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Draft,
    Active,
    Retired,
    Unknown,
}

impl From<&str> for TopicStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "draft" => Self::Draft,
            "active" => Self::Active,
            "retired" => Self::Retired,
            _ => Self::Unknown,
        }
    }
}

/// Behavior for a query-criteria side when it has no result to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryResultBehavior {
    #[default]
    TestPasses,
    TestFails,
    NoTest,
}

/// `{queryPrevious, queryCurrent, requireBothQueries}` (spec §3).
#[derive(Debug, Clone, Default)]
pub struct QueryCriteria {
    pub previous: Option<String>,
    pub current: Option<String>,
    pub require_both: bool,
    pub result_for_create: QueryResultBehavior,
    pub result_for_delete: QueryResultBehavior,
}

/// One resource trigger within a topic (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ResourceTrigger {
    pub resource_type: String,
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
    pub query_criteria: Option<QueryCriteria>,
    pub require_both_queries: bool,
    pub create_auto_pass: bool,
    pub create_auto_fail: bool,
    pub delete_auto_pass: bool,
    pub delete_auto_fail: bool,
    pub fhir_path_criteria: Option<String>,
}

/// A filter name a subscriber is permitted to constrain per resource type.
#[derive(Debug, Clone)]
pub struct AllowedFilter {
    pub resource_type: String,
    pub filter_parameter: String,
}

/// `{includes, revIncludes}` additional-context shape for one resource type.
#[derive(Debug, Clone, Default)]
pub struct NotificationShape {
    pub resource_type: String,
    pub includes: Vec<String>,
    pub rev_includes: Vec<String>,
}

/// A parsed `SubscriptionTopic` optimized for runtime event matching
/// (spec §3).
#[derive(Debug, Clone)]
pub struct ParsedSubscriptionTopic {
    pub id: String,
    pub url: String,
    pub status: TopicStatus,
    pub resource_triggers: HashMap<String, Vec<ResourceTrigger>>,
    pub allowed_filters: HashMap<String, Vec<AllowedFilter>>,
    pub notification_shapes: HashMap<String, NotificationShape>,
}

/// Delivery channel kinds this server supports (spec §4.6 — websocket and
/// message channels from the wider FHIR subscription spec are out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    RestHook,
    Email,
    Zulip,
}

impl ChannelType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "rest-hook" => Some(Self::RestHook),
            "email" => Some(Self::Email),
            "zulip" => Some(Self::Zulip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionChannel {
    pub channel_system: String,
    pub channel_code: ChannelType,
    pub endpoint: Option<String>,
    pub parameters: HashMap<String, Vec<String>>,
    pub heartbeat_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
    pub content_type: String,
}

/// `{empty, id-only, full-resource}` (spec §3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadContent {
    Empty,
    IdOnly,
    FullResource,
}

impl PayloadContent {
    pub fn from_code(code: &str) -> Self {
        match code {
            "id-only" => Self::IdOnly,
            "full-resource" => Self::FullResource,
            _ => Self::Empty,
        }
    }
}

/// `{requested, active, error, off}` (spec §4.5 lifecycle state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Requested,
    Active,
    Error,
    Off,
}

/// A single named filter entry, `{name, comparator, modifier, value}`
/// (spec §3).
#[derive(Debug, Clone)]
pub struct SubscriptionFilter {
    pub name: String,
    pub comparator: Option<fhirkit_search::Comparator>,
    pub modifier: fhirkit_search::Modifier,
    pub value: String,
}

/// `{subscriptionId, topicUrl, eventNumber, timestamp, statusAtGeneration,
/// focus, additionalContext}` (spec §3).
#[derive(Debug, Clone)]
pub struct SubscriptionEvent {
    pub subscription_id: String,
    pub topic_url: String,
    pub event_number: u64,
    pub timestamp: FhirDateTime,
    pub status_at_generation: SubscriptionStatus,
    pub focus: serde_json::Value,
    pub additional_context: Vec<serde_json::Value>,
}

/// An active (or lapsed) subscription with its mutable runtime state
/// (spec §3). Exposed only through [`crate::registry::SubscriptionRegistry`],
/// which guards the fields the concurrency model (spec §5) requires atomic
/// or lock-protected access to.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
    pub id: String,
    pub topic_url: String,
    pub filters: HashMap<String, Vec<SubscriptionFilter>>,
    pub channel: SubscriptionChannel,
    pub content_level: PayloadContent,
    pub max_events_per_notification: usize,
    pub status: SubscriptionStatus,
    pub expiration: Option<FhirDateTime>,
    /// When the subscription became active; the baseline for heartbeat grace
    /// before any communication has happened (spec §4.6).
    pub activated_at: Option<FhirDateTime>,
    pub last_communication: Option<FhirDateTime>,
    pub current_event_count: u64,
    pub generated_events: HashMap<u64, SubscriptionEvent>,
    pub notification_errors: Vec<String>,
    pub consecutive_failures: u8,
}

impl ActiveSubscription {
    pub fn new(id: String, topic_url: String, channel: SubscriptionChannel, content_level: PayloadContent) -> Self {
        Self {
            id,
            topic_url,
            filters: HashMap::new(),
            channel,
            content_level,
            max_events_per_notification: 20,
            status: SubscriptionStatus::Requested,
            expiration: None,
            activated_at: None,
            last_communication: None,
            current_event_count: 0,
            generated_events: HashMap::new(),
            notification_errors: Vec::new(),
            consecutive_failures: 0,
        }
    }
}
