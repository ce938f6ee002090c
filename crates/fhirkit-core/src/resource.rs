//! The logical resource model used by the in-memory store (spec §3).
//!
//! A resource is identified by `(resourceType, id)` and carries a
//! `meta.versionId` / `meta.lastUpdated` pair the store maintains on every
//! write. The resource body itself stays opaque `serde_json::Value` here —
//! the [`crate::adapter::VersionAdapter`] capability is the only place that
//! knows how to interpret a concrete FHIR version's element tree.

use crate::time::{now_utc, FhirDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single versioned resource instance as held by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    pub resource_type: String,
    pub id: String,
    pub version_id: String,
    pub last_updated: FhirDateTime,
    /// Full serialized resource body, including `meta.versionId` /
    /// `meta.lastUpdated` kept in sync with the fields above.
    pub body: Value,
}

impl StoredResource {
    /// Construct the first version (`versionId = "1"`) of a resource,
    /// stamping `meta` onto `body` in place.
    pub fn new_initial(resource_type: impl Into<String>, id: impl Into<String>, mut body: Value) -> Self {
        let resource_type = resource_type.into();
        let id = id.into();
        let last_updated = now_utc();
        let version_id = "1".to_string();
        stamp_meta(&mut body, &resource_type, &id, &version_id, &last_updated);
        Self {
            resource_type,
            id,
            version_id,
            last_updated,
            body,
        }
    }

    /// Construct the next version following `previous`, stamping the new
    /// `meta` onto `body`. Per spec §3: version becomes `oldVersion + 1`, or
    /// `"1"` if the previous version string does not parse as an integer.
    pub fn new_update(previous: &StoredResource, mut body: Value) -> Self {
        let version_id = next_version(&previous.version_id);
        let last_updated = now_utc();
        stamp_meta(&mut body, &previous.resource_type, &previous.id, &version_id, &last_updated);
        Self {
            resource_type: previous.resource_type.clone(),
            id: previous.id.clone(),
            version_id,
            last_updated,
            body,
        }
    }
}

/// `oldVersion + 1` as a decimal string, or `"1"` if `old` doesn't parse.
pub fn next_version(old: &str) -> String {
    match old.parse::<u64>() {
        Ok(n) => (n + 1).to_string(),
        Err(_) => "1".to_string(),
    }
}

fn stamp_meta(
    body: &mut Value,
    resource_type: &str,
    id: &str,
    version_id: &str,
    last_updated: &FhirDateTime,
) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert("resourceType".to_string(), Value::String(resource_type.to_string()));
        obj.insert("id".to_string(), Value::String(id.to_string()));
        let meta = obj
            .entry("meta")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(meta_obj) = meta.as_object_mut() {
            meta_obj.insert("versionId".to_string(), Value::String(version_id.to_string()));
            meta_obj.insert(
                "lastUpdated".to_string(),
                Value::String(last_updated.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_version_is_one() {
        let r = StoredResource::new_initial("Patient", "p1", json!({"active": true}));
        assert_eq!(r.version_id, "1");
        assert_eq!(r.body["meta"]["versionId"], "1");
        assert_eq!(r.body["resourceType"], "Patient");
        assert_eq!(r.body["id"], "p1");
    }

    #[test]
    fn update_increments_version() {
        let first = StoredResource::new_initial("Patient", "p1", json!({}));
        let second = StoredResource::new_update(&first, json!({"active": false}));
        assert_eq!(second.version_id, "2");
        assert_eq!(second.body["meta"]["versionId"], "2");
    }

    #[test]
    fn unparseable_version_resets_to_one() {
        assert_eq!(next_version("abc"), "1");
        assert_eq!(next_version(""), "1");
        assert_eq!(next_version("7"), "8");
    }
}
