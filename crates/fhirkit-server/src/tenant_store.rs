//! The Tenant Store (spec §4.7, C7): composes the Version Adapter, Resource
//! Store registry, Search Engine, and Subscription Engine for one tenant,
//! and exposes the single `handle` entry point an HTTP handler drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};

use fhirkit_core::adapter::{JsonVersionAdapter, Mime, TypedElement, VersionAdapter};
use fhirkit_core::error::{CoreError, Result};
use fhirkit_core::events::{EventBroadcaster, StoreEvent};
use fhirkit_core::interaction::{parse_interaction, Interaction, InteractionParseError, ParsedInteraction};
use fhirkit_core::outcome::OperationOutcome;
use fhirkit_core::tenant::Tenant;
use fhirkit_notifications::NotificationDispatcher;
use fhirkit_search::{execute_search, parse_query};
use fhirkit_store::ResourceStoreRegistry;
use fhirkit_subscriptions::{event_matcher::WriteKind, process_write, registry::parse_subscription, topic_registry::parse_subscription_topic, SubscriptionRegistry, TopicRegistry};

use crate::patch::apply_json_patch;

/// What an HTTP handler hands the Tenant Store: the parsed interaction plus
/// whatever raw material the dispatch needs (body bytes, wire format, the
/// `If-*` preconditions). The HTTP layer is responsible for content
/// negotiation; this struct carries only already-decoded pieces.
pub struct RequestContext {
    pub parsed: ParsedInteraction,
    pub body: Option<Value>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_none_exist: Option<String>,
}

/// What the Tenant Store hands back for the HTTP layer to render (spec §6).
pub struct ResponseContext {
    pub status: u16,
    pub body: Value,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub location: Option<String>,
}

impl ResponseContext {
    fn ok(status: u16, body: Value) -> Self {
        Self { status, body, etag: None, last_modified: None, location: None }
    }

    fn error(err: &CoreError) -> Self {
        Self::ok(err.http_status(), OperationOutcome::from(err).to_json())
    }
}

/// Composes §4.2–§4.5 for one tenant (spec §4.7).
pub struct TenantStore {
    pub tenant: Tenant,
    adapter: JsonVersionAdapter,
    registry: ResourceStoreRegistry,
    topics: TopicRegistry,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    capability_stale: AtomicBool,
    capability_cache: RwLock<Option<Value>>,
}

impl TenantStore {
    pub fn new(tenant: Tenant) -> Self {
        let events = EventBroadcaster::default();
        let registry = ResourceStoreRegistry::new(events, tenant.max_resource_count);
        let adapter = JsonVersionAdapter::new(tenant.fhir_version);
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(subscriptions.clone()));
        Self {
            tenant,
            adapter,
            registry,
            topics: TopicRegistry::new(),
            subscriptions,
            dispatcher,
            capability_stale: AtomicBool::new(true),
            capability_cache: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &ResourceStoreRegistry {
        &self.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    fn is_known_type(&self, resource_type: &str) -> bool {
        self.registry.get(resource_type).is_some()
    }

    /// Parses `(method, url)` against this tenant's configured resource
    /// types (spec §4.1), for the HTTP layer to call before building a
    /// [`RequestContext`].
    pub fn parse_request(&self, method: &str, url: &str) -> std::result::Result<ParsedInteraction, InteractionParseError> {
        parse_interaction(method, url, self.tenant.normalized_base_url(), |rt| self.is_known_type(rt))
    }

    /// Registers a resource type up front (used by bootstrap loading) so it
    /// shows up in the capability statement and the parser's `is_known_type`
    /// predicate even before any instance has been written.
    pub fn ensure_known_type(&self, resource_type: &str) {
        self.registry.get_or_create(resource_type);
        self.mark_capability_stale();
    }

    pub fn mark_capability_stale(&self) {
        self.capability_stale.store(true, Ordering::Release);
    }

    /// The `metadata` response. Source left `capability_stale` set on some
    /// mutation paths without ever clearing it; here the cache is simply
    /// recomputed whenever it's stale, so a read always reflects the
    /// registry's current resource types and search parameters.
    pub fn capability_statement(&self) -> Value {
        if self.capability_stale.load(Ordering::Acquire) {
            let recomputed = self.build_capability_statement();
            *self.capability_cache.write().unwrap() = Some(recomputed.clone());
            self.capability_stale.store(false, Ordering::Release);
            return recomputed;
        }
        if let Some(cached) = self.capability_cache.read().unwrap().clone() {
            return cached;
        }
        let recomputed = self.build_capability_statement();
        *self.capability_cache.write().unwrap() = Some(recomputed.clone());
        recomputed
    }

    fn build_capability_statement(&self) -> Value {
        let mut resource_types = self.registry.known_resource_types();
        resource_types.sort();
        let resources: Vec<Value> = resource_types
            .iter()
            .map(|rt| {
                let store = self.registry.get_or_create(rt);
                let search_params: Vec<Value> = store
                    .search_parameters()
                    .iter()
                    .map(|def| json!({"name": def.name, "type": format!("{:?}", def.param_type).to_lowercase()}))
                    .collect();
                json!({
                    "type": rt,
                    "interaction": [
                        {"code": "read"}, {"code": "vread"}, {"code": "create"},
                        {"code": "update"}, {"code": "patch"}, {"code": "delete"},
                        {"code": "search-type"},
                    ],
                    "searchParam": search_params,
                })
            })
            .collect();

        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": self.tenant.fhir_version.to_string(),
            "format": ["json"],
            "rest": [{"mode": "server", "resource": resources}],
        })
    }

    /// `TryResolve(uri) → TypedElement?` (spec §4.7), used by the search
    /// engine's chained/include expansion and by FHIRPath resolution.
    pub fn try_resolve(&self, resource_type: &str, id: &str) -> Option<TypedElement> {
        self.registry
            .get(resource_type)
            .and_then(|store| store.instance_read(id))
            .map(|stored| self.adapter.to_typed_element(stored.body))
    }

    /// Parses and registers a `Subscription` or `SubscriptionTopic` resource
    /// arriving through the regular write path (spec §4.5's resource-facing
    /// registration, not a separate admin API).
    pub fn register_conformance_resource(&self, resource_type: &str, body: &Value) -> Result<()> {
        match resource_type {
            "SubscriptionTopic" => {
                let topic = parse_subscription_topic(body).map_err(|e| CoreError::parse(e.to_string()))?;
                self.topics.register(topic);
                Ok(())
            }
            "Subscription" => {
                let subscription = parse_subscription(body).map_err(|e| CoreError::parse(e.to_string()))?;
                let id = subscription.id.clone();
                self.subscriptions.register(subscription);
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move { dispatcher.dispatch_handshake(&id).await });
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn notify_write(&self, resource_type: &str, kind: WriteKind, previous: Option<&Value>, current: Option<&Value>) {
        let events = process_write(&self.adapter, &self.registry, &self.topics, &self.subscriptions, resource_type, kind, previous, current);
        if events.is_empty() {
            return;
        }
        let mut by_subscription: std::collections::HashMap<String, Vec<_>> = std::collections::HashMap::new();
        for event in events {
            by_subscription.entry(event.subscription_id.clone()).or_default().push(event);
        }
        for (subscription_id, events) in by_subscription {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch_events(&subscription_id, events).await });
        }
    }

    /// `ParseNotificationBundle(bundle)` (spec §4.7): extracts the
    /// `SubscriptionStatus` resource a notification bundle's first entry
    /// carries, for display/diagnostic purposes.
    pub fn parse_notification_bundle(bundle: &Value) -> Option<Value> {
        bundle.get("entry")?.as_array()?.first()?.get("resource").cloned()
    }

    /// Dispatches one parsed interaction (spec §4.7's `Handle`).
    pub fn handle(&self, ctx: RequestContext) -> ResponseContext {
        match self.handle_inner(ctx) {
            Ok(response) => response,
            Err(err) => ResponseContext::error(&err),
        }
    }

    fn handle_inner(&self, ctx: RequestContext) -> Result<ResponseContext> {
        let parsed = &ctx.parsed;
        match parsed.interaction {
            Interaction::SystemCapabilities => Ok(ResponseContext::ok(200, self.capability_statement())),
            Interaction::SystemSearch => {
                let bundle = json!({"resourceType": "Bundle", "type": "searchset", "total": 0, "entry": []});
                Ok(ResponseContext::ok(200, bundle))
            }
            Interaction::SystemBundle => self.handle_bundle(ctx.body.unwrap_or(Value::Null)),
            Interaction::TypeSearch => self.handle_search(parsed.resource_type.as_deref().unwrap_or(""), &parsed.query),
            Interaction::TypeCreate => self.handle_create(parsed.resource_type.as_deref().unwrap_or(""), ctx.body.unwrap_or(Value::Null), None, ctx.if_none_exist.as_deref()),
            Interaction::TypeCreateConditional => {
                self.handle_create_conditional(parsed.resource_type.as_deref().unwrap_or(""), ctx.body.unwrap_or(Value::Null), &parsed.query)
            }
            Interaction::InstanceRead => self.handle_read(parsed.resource_type.as_deref().unwrap_or(""), parsed.id.as_deref().unwrap_or("")),
            Interaction::InstanceReadVersion => {
                self.handle_read_version(parsed.resource_type.as_deref().unwrap_or(""), parsed.id.as_deref().unwrap_or(""), parsed.version.as_deref().unwrap_or(""))
            }
            Interaction::InstanceUpdate => self.handle_update(
                parsed.resource_type.as_deref().unwrap_or(""),
                parsed.id.as_deref().unwrap_or(""),
                ctx.body.unwrap_or(Value::Null),
                ctx.if_match.as_deref(),
            ),
            Interaction::InstancePatch => {
                self.handle_patch(parsed.resource_type.as_deref().unwrap_or(""), parsed.id.as_deref().unwrap_or(""), ctx.body.unwrap_or(Value::Null))
            }
            Interaction::InstanceDelete => self.handle_delete(parsed.resource_type.as_deref().unwrap_or(""), parsed.id.as_deref().unwrap_or("")),
            Interaction::CompartmentSearch => self.handle_compartment_search(parsed.compartment_type.as_deref().unwrap_or(""), parsed.id.as_deref().unwrap_or(""), None),
            Interaction::CompartmentTypeSearch => self.handle_compartment_search(
                parsed.compartment_type.as_deref().unwrap_or(""),
                parsed.id.as_deref().unwrap_or(""),
                parsed.resource_type.as_deref(),
            ),
            other => Err(CoreError::parse(format!("interaction {other:?} is not implemented by this server"))),
        }
    }

    fn handle_search(&self, resource_type: &str, query: &str) -> Result<ResponseContext> {
        let parsed_query = parse_query(query)?;
        let base_url = self.tenant.normalized_base_url();
        let bundle = execute_search(&self.adapter, &self.registry, resource_type, &parsed_query, base_url, query)?;
        Ok(ResponseContext::ok(200, bundle))
    }

    fn handle_compartment_search(&self, compartment_type: &str, id: &str, restrict_to: Option<&str>) -> Result<ResponseContext> {
        let focus_ref = format!("{compartment_type}/{id}");
        let candidate_types: Vec<String> = match restrict_to {
            Some(rt) => vec![rt.to_string()],
            None => self.registry.known_resource_types(),
        };

        let mut entries = Vec::new();
        for rt in candidate_types {
            let store = self.registry.get_or_create(&rt);
            let resolver = |t: &str, i: &str| self.try_resolve(t, i);
            for stored in store.all() {
                let element = TypedElement::from_value(stored.body.clone());
                let matches = store.search_parameters().iter().filter(|def| def.param_type == fhirkit_store::search_param::SearchParamType::Reference).any(|def| {
                    self.adapter
                        .evaluate_path(&element, &def.expression, &resolver)
                        .iter()
                        .filter_map(|e| self.adapter.extract_reference(e))
                        .any(|r| r == focus_ref)
                });
                if matches {
                    entries.push(json!({"fullUrl": format!("{}/{}/{}", self.tenant.normalized_base_url(), stored.resource_type, stored.id), "resource": stored.body, "search": {"mode": "match"}}));
                }
            }
        }

        let total = entries.len();
        Ok(ResponseContext::ok(200, json!({"resourceType": "Bundle", "type": "searchset", "total": total, "entry": entries})))
    }

    fn handle_create(&self, resource_type: &str, body: Value, id: Option<&str>, if_none_exist: Option<&str>) -> Result<ResponseContext> {
        if let Some(criteria) = if_none_exist {
            let existing = parse_query(criteria).ok();
            if let Some(query) = existing {
                let base_url = self.tenant.normalized_base_url();
                let bundle = execute_search(&self.adapter, &self.registry, resource_type, &query, base_url, criteria)?;
                if bundle["total"].as_u64().unwrap_or(0) > 0 {
                    let entry = &bundle["entry"][0]["resource"];
                    return Ok(ResponseContext::ok(200, entry.clone()));
                }
            }
        }
        let store = self.registry.get_or_create(resource_type);
        let stored = store.instance_create(id, id.is_some(), body)?;
        self.notify_write(resource_type, WriteKind::Create, None, Some(&stored.body));
        self.register_conformance_resource(resource_type, &stored.body)?;
        self.mark_capability_stale();
        let mut response = ResponseContext::ok(201, stored.body.clone());
        response.etag = Some(format!("W/\"{}\"", stored.version_id));
        response.location = Some(format!("{resource_type}/{}", stored.id));
        Ok(response)
    }

    fn handle_create_conditional(&self, resource_type: &str, body: Value, query: &str) -> Result<ResponseContext> {
        self.handle_create(resource_type, body, None, Some(query))
    }

    fn handle_read(&self, resource_type: &str, id: &str) -> Result<ResponseContext> {
        let store = self.registry.get_or_create(resource_type);
        let stored = store.instance_read(id).ok_or_else(|| CoreError::not_found(format!("{resource_type}/{id}")))?;
        let mut response = ResponseContext::ok(200, stored.body);
        response.etag = Some(format!("W/\"{}\"", stored.version_id));
        response.last_modified = Some(stored.last_updated.to_string());
        Ok(response)
    }

    fn handle_read_version(&self, resource_type: &str, id: &str, version: &str) -> Result<ResponseContext> {
        let store = self.registry.get_or_create(resource_type);
        let stored = store.instance_read(id).ok_or_else(|| CoreError::not_found(format!("{resource_type}/{id}")))?;
        if stored.version_id != version {
            return Err(CoreError::not_found(format!("{resource_type}/{id}/_history/{version}")));
        }
        Ok(ResponseContext::ok(200, stored.body))
    }

    fn handle_update(&self, resource_type: &str, id: &str, body: Value, if_match: Option<&str>) -> Result<ResponseContext> {
        let store = self.registry.get_or_create(resource_type);
        if let Some(expected) = if_match {
            let expected = expected.trim().trim_start_matches("W/").trim_matches('"');
            let current = store.instance_read(id).ok_or_else(|| CoreError::not_found(format!("{resource_type}/{id}")))?;
            if current.version_id != expected {
                return Err(CoreError::PreconditionFailed(format!("expected version {expected}, found {}", current.version_id)));
            }
        }
        let (previous, current) = store.instance_update(id, body)?;
        self.notify_write(resource_type, WriteKind::Update, Some(&previous.body), Some(&current.body));
        self.mark_capability_stale();
        let mut response = ResponseContext::ok(200, current.body.clone());
        response.etag = Some(format!("W/\"{}\"", current.version_id));
        Ok(response)
    }

    fn handle_patch(&self, resource_type: &str, id: &str, patch_body: Value) -> Result<ResponseContext> {
        let store = self.registry.get_or_create(resource_type);
        let current = store.instance_read(id).ok_or_else(|| CoreError::not_found(format!("{resource_type}/{id}")))?;
        let patched = apply_json_patch(&current.body, &patch_body)?;
        let (previous, updated) = store.instance_update(id, patched)?;
        self.notify_write(resource_type, WriteKind::Update, Some(&previous.body), Some(&updated.body));
        let mut response = ResponseContext::ok(200, updated.body.clone());
        response.etag = Some(format!("W/\"{}\"", updated.version_id));
        Ok(response)
    }

    fn handle_delete(&self, resource_type: &str, id: &str) -> Result<ResponseContext> {
        let store = self.registry.get_or_create(resource_type);
        match store.instance_delete(id) {
            Ok(previous) => {
                self.notify_write(resource_type, WriteKind::Delete, Some(&previous.body), None);
                Ok(ResponseContext::ok(204, Value::Null))
            }
            Err(CoreError::NotFound(_)) => Ok(ResponseContext::ok(204, Value::Null)),
            Err(other) => Err(other),
        }
    }

    fn handle_bundle(&self, body: Value) -> Result<ResponseContext> {
        let entries = body.get("entry").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut response_entries = Vec::with_capacity(entries.len());
        for entry in entries {
            let method = entry.pointer("/request/method").and_then(Value::as_str).unwrap_or("GET").to_string();
            let url = entry.pointer("/request/url").and_then(Value::as_str).unwrap_or("").to_string();
            let resource_body = entry.get("resource").cloned();
            let sub_parsed = self.parse_request(&method, &url);
            let sub_response = match sub_parsed {
                Ok(parsed) => self.handle(RequestContext { parsed, body: resource_body, if_match: None, if_none_match: None, if_none_exist: None }),
                Err(e) => ResponseContext::error(&CoreError::parse(e.reason)),
            };
            response_entries.push(json!({
                "response": {
                    "status": sub_response.status.to_string(),
                    "location": sub_response.location,
                    "etag": sub_response.etag,
                },
                "resource": sub_response.body,
            }));
        }
        Ok(ResponseContext::ok(200, json!({"resourceType": "Bundle", "type": "batch-response", "entry": response_entries})))
    }
}

/// Maps the accept header to a wire format, falling back to JSON (the only
/// format this server's adapter can serialize — see
/// [`fhirkit_core::adapter::JsonVersionAdapter`]'s doc comment).
pub fn negotiate_mime(header: Option<&str>) -> Mime {
    header.and_then(Mime::from_content_type).unwrap_or(Mime::Json)
}

pub fn interaction_parse_error_to_outcome(err: &InteractionParseError) -> (u16, Value) {
    let outcome = OperationOutcome::new(fhirkit_core::outcome::IssueSeverity::Error, "invalid", err.reason.clone());
    (400, outcome.to_json())
}
