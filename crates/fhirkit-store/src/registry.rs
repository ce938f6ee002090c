//! Per-tenant registry of [`ResourceStore`]s, one per resource type,
//! created lazily on first touch.

use crate::store::ResourceStore;
use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use fhirkit_core::events::EventBroadcaster;
use std::sync::Arc;

pub struct ResourceStoreRegistry {
    stores: DashMap<String, Arc<ResourceStore>>,
    events: EventBroadcaster,
    max_resource_count: Option<usize>,
}

impl ResourceStoreRegistry {
    pub fn new(events: EventBroadcaster, max_resource_count: Option<usize>) -> Self {
        Self {
            stores: DashMap::new(),
            events,
            max_resource_count,
        }
    }

    /// Returns the store for `resource_type`, creating it on first access.
    pub fn get_or_create(&self, resource_type: &str) -> Arc<ResourceStore> {
        if let Some(existing) = self.stores.get(resource_type) {
            return existing.clone();
        }
        self.stores
            .entry(resource_type.to_string())
            .or_insert_with(|| {
                Arc::new(
                    ResourceStore::new(resource_type.to_string(), self.events.clone())
                        .with_max_resource_count(self.max_resource_count),
                )
            })
            .clone()
    }

    /// Looks up an existing store without creating one, for callers (like
    /// the interaction parser's `is_known_type` predicate) that must not
    /// have the side effect of materializing empty stores.
    pub fn get(&self, resource_type: &str) -> Option<Ref<'_, String, Arc<ResourceStore>>> {
        self.stores.get(resource_type)
    }

    pub fn known_resource_types(&self) -> Vec<String> {
        self.stores.iter().map(|entry| entry.key().clone()).collect()
    }
}
