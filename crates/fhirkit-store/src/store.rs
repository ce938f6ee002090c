//! The Resource Store (spec §4.3, C3): one instance per `(tenant,
//! resourceType)`.

use crate::search_param::{SearchParamDefinition, SearchParamType};
use fhirkit_core::error::{CoreError, Result};
use fhirkit_core::events::{EventBroadcaster, StoreEvent};
use fhirkit_core::id::{generate_id, validate_id};
use fhirkit_core::resource::StoredResource;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

struct StoreInner {
    resources: HashMap<String, StoredResource>,
    search_params: IndexMap<String, SearchParamDefinition>,
}

/// Holds the map `id → Resource` and the executable search-parameter
/// registry for one resource type within one tenant, guarded by a single
/// reader-writer lock (spec §5: "held across the entire operation... The
/// lock is released before event emission").
pub struct ResourceStore {
    resource_type: String,
    inner: RwLock<StoreInner>,
    events: EventBroadcaster,
    max_resource_count: Option<usize>,
}

impl ResourceStore {
    pub fn new(resource_type: impl Into<String>, events: EventBroadcaster) -> Self {
        Self {
            resource_type: resource_type.into(),
            inner: RwLock::new(StoreInner {
                resources: HashMap::new(),
                search_params: IndexMap::new(),
            }),
            events,
            max_resource_count: None,
        }
    }

    pub fn with_max_resource_count(mut self, cap: Option<usize>) -> Self {
        self.max_resource_count = cap;
        self
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn instance_read(&self, id: &str) -> Option<StoredResource> {
        self.inner.read().unwrap().resources.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every current resource, for the Search Engine to scan. The
    /// store does not index by search parameter itself (spec leaves
    /// predicate evaluation to C4); this is the seam between the two.
    pub fn all(&self) -> Vec<StoredResource> {
        self.inner.read().unwrap().resources.values().cloned().collect()
    }

    /// `InstanceCreate(source, allowExistingId)` (spec §4.3). If
    /// `allow_existing_id` is false or `id` is empty, a fresh UUID is
    /// assigned; otherwise creation fails if `id` already exists.
    pub fn instance_create(
        &self,
        id: Option<&str>,
        allow_existing_id: bool,
        body: Value,
    ) -> Result<StoredResource> {
        let assigned_id = match id {
            Some(id) if allow_existing_id && !id.is_empty() => {
                validate_id(id)?;
                id.to_string()
            }
            _ => generate_id(),
        };

        let stored = {
            let mut guard = self.inner.write().unwrap();
            if guard.resources.contains_key(&assigned_id) {
                return Err(CoreError::conflict(format!(
                    "{}/{} already exists",
                    self.resource_type, assigned_id
                )));
            }
            if let Some(max) = self.max_resource_count {
                if guard.resources.len() >= max {
                    return Err(CoreError::conflict(format!(
                        "{} has reached its configured resource cap ({max})",
                        self.resource_type
                    )));
                }
            }
            let stored = StoredResource::new_initial(self.resource_type.clone(), assigned_id.clone(), body);
            guard.resources.insert(assigned_id, stored.clone());
            stored
        };

        self.events.publish(StoreEvent::InstanceCreated {
            current: stored.clone(),
        });
        Ok(stored)
    }

    /// `InstanceUpdate(source)` (spec §4.3). Fails if the target id does not
    /// already exist — this store does not implement create-on-PUT, since
    /// the spec only describes a read-then-replace path for update.
    pub fn instance_update(&self, id: &str, body: Value) -> Result<(StoredResource, StoredResource)> {
        if id.is_empty() {
            return Err(CoreError::parse("update requires a non-empty resource id"));
        }

        let (previous, current) = {
            let mut guard = self.inner.write().unwrap();
            let previous = guard
                .resources
                .get(id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("{}/{id}", self.resource_type)))?;
            let current = StoredResource::new_update(&previous, body);
            guard.resources.insert(id.to_string(), current.clone());
            (previous, current)
        };

        self.events.publish(StoreEvent::InstanceUpdated {
            previous: previous.clone(),
            current: current.clone(),
        });
        Ok((previous, current))
    }

    /// `InstanceDelete(id)` (spec §4.3). History is not retained by this
    /// store; delete simply removes the entry.
    pub fn instance_delete(&self, id: &str) -> Result<StoredResource> {
        let previous = {
            let mut guard = self.inner.write().unwrap();
            guard
                .resources
                .remove(id)
                .ok_or_else(|| CoreError::not_found(format!("{}/{id}", self.resource_type)))?
        };

        self.events.publish(StoreEvent::InstanceDeleted {
            previous: previous.clone(),
        });
        Ok(previous)
    }

    pub fn set_executable_search_parameter(&self, def: SearchParamDefinition) {
        self.inner.write().unwrap().search_params.insert(def.name.clone(), def);
    }

    pub fn remove_executable_search_parameter(&self, name: &str) {
        self.inner.write().unwrap().search_params.shift_remove(name);
    }

    pub fn search_parameter(&self, name: &str) -> Option<SearchParamDefinition> {
        self.inner.read().unwrap().search_params.get(name).cloned()
    }

    pub fn search_parameters(&self) -> Vec<SearchParamDefinition> {
        self.inner.read().unwrap().search_params.values().cloned().collect()
    }

    /// `Type:param[:TargetType]` tokens this store can serve through
    /// `_include`/`_revinclude`, derived from its reference-typed
    /// parameters rather than tracked as separate state.
    pub fn supported_include_tokens(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap()
            .search_params
            .values()
            .filter(|def| def.param_type == SearchParamType::Reference)
            .map(|def| format!("{}:{}", self.resource_type, def.name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ResourceStore {
        ResourceStore::new("Patient", EventBroadcaster::default())
    }

    #[test]
    fn create_assigns_uuid_when_no_id_allowed() {
        let store = store();
        let stored = store.instance_create(None, false, json!({"active": true})).unwrap();
        assert!(!stored.id.is_empty());
        assert_eq!(stored.version_id, "1");
    }

    #[test]
    fn create_fails_on_id_collision() {
        let store = store();
        store.instance_create(Some("p1"), true, json!({})).unwrap();
        let err = store.instance_create(Some("p1"), true, json!({})).unwrap_err();
        assert_eq!(err.category(), fhirkit_core::error::ErrorCategory::Conflict);
    }

    #[test]
    fn read_after_create_returns_same_resource() {
        let store = store();
        let stored = store.instance_create(Some("p1"), true, json!({"active": true})).unwrap();
        let read = store.instance_read("p1").unwrap();
        assert_eq!(read.id, stored.id);
        assert_eq!(read.version_id, stored.version_id);
    }

    #[test]
    fn update_increments_version_and_returns_previous() {
        let store = store();
        store.instance_create(Some("p1"), true, json!({"active": true})).unwrap();
        let (previous, current) = store.instance_update("p1", json!({"active": false})).unwrap();
        assert_eq!(previous.version_id, "1");
        assert_eq!(current.version_id, "2");
        assert_eq!(store.instance_read("p1").unwrap().version_id, "2");
    }

    #[test]
    fn update_on_missing_id_is_not_found() {
        let store = store();
        let err = store.instance_update("missing", json!({})).unwrap_err();
        assert_eq!(err.category(), fhirkit_core::error::ErrorCategory::NotFound);
    }

    #[test]
    fn delete_removes_and_returns_previous() {
        let store = store();
        store.instance_create(Some("p1"), true, json!({})).unwrap();
        let previous = store.instance_delete("p1").unwrap();
        assert_eq!(previous.id, "p1");
        assert!(store.instance_read("p1").is_none());
    }

    #[test]
    fn max_resource_count_is_enforced() {
        let store = store().with_max_resource_count(Some(1));
        store.instance_create(Some("p1"), true, json!({})).unwrap();
        let err = store.instance_create(Some("p2"), true, json!({})).unwrap_err();
        assert_eq!(err.category(), fhirkit_core::error::ErrorCategory::Conflict);
    }

    #[test]
    fn include_tokens_derive_from_reference_params() {
        let store = store();
        store.set_executable_search_parameter(SearchParamDefinition::new(
            "general-practitioner",
            "Patient",
            SearchParamType::Reference,
            "Patient.generalPractitioner",
        ));
        assert_eq!(store.supported_include_tokens(), vec!["Patient:general-practitioner".to_string()]);
    }
}
