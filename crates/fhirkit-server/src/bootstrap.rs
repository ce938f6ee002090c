//! Startup bootstrap: turns configured [`TenantConfig`]s into live
//! [`TenantStore`]s and preloads each tenant's bootstrap directory of seed
//! resource JSON files, if one is configured (spec §3's `bootstrap_dir`).

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConfigError, TenantConfig};
use crate::tenant_store::TenantStore;

pub fn build_tenant_stores(configs: Vec<TenantConfig>) -> Result<Vec<Arc<TenantStore>>, ConfigError> {
    let mut stores = Vec::with_capacity(configs.len());
    for config in configs {
        let controller_name = config.controller_name.clone();
        let bootstrap_dir = config.bootstrap_dir.clone();
        let tenant = config.into_tenant()?;
        let store = Arc::new(TenantStore::new(tenant));
        if let Some(dir) = bootstrap_dir {
            load_bootstrap_resources(&store, &dir);
        }
        info!(tenant = %controller_name, "tenant store initialized");
        stores.push(store);
    }
    Ok(stores)
}

/// Reads every `*.json` file in `dir` and creates each resource it contains
/// through the normal write path, so indexing and capability-statement
/// invalidation happen exactly as they would for a client-submitted create.
fn load_bootstrap_resources(store: &TenantStore, dir: &str) {
    let path = Path::new(dir);
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(tenant = %store.tenant.controller_name, dir, error = %e, "bootstrap directory not readable, skipping");
            return;
        }
    };

    let mut loaded = 0usize;
    for entry in entries.flatten() {
        let file_path = entry.path();
        if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&file_path).ok().and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok()) {
            Some(body) => {
                let Some(resource_type) = body.get("resourceType").and_then(|v| v.as_str()).map(str::to_string) else {
                    warn!(file = %file_path.display(), "bootstrap file missing resourceType, skipping");
                    continue;
                };
                let id = body.get("id").and_then(|v| v.as_str()).map(str::to_string);
                let registry_store = store.registry().get_or_create(&resource_type);
                match registry_store.instance_create(id.as_deref(), id.is_some(), body) {
                    Ok(stored) => {
                        let _ = store.register_conformance_resource(&resource_type, &stored.body);
                        loaded += 1;
                    }
                    Err(e) => warn!(file = %file_path.display(), error = %e, "failed to load bootstrap resource"),
                }
            }
            None => warn!(file = %file_path.display(), "bootstrap file is not valid JSON, skipping"),
        }
    }
    store.mark_capability_stale();
    info!(tenant = %store.tenant.controller_name, count = loaded, "loaded bootstrap resources");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_core::tenant::{FhirVersion, Tenant};

    fn write_resource(dir: &std::path::Path, name: &str, body: serde_json::Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&body).unwrap()).unwrap();
    }

    #[test]
    fn loads_every_json_file_in_the_bootstrap_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_resource(dir.path(), "patient-1.json", serde_json::json!({"resourceType": "Patient", "id": "p1"}));
        write_resource(dir.path(), "obs-1.json", serde_json::json!({"resourceType": "Observation", "id": "o1"}));
        write_resource(dir.path(), "notes.txt", serde_json::json!({"ignored": true}));

        let store = TenantStore::new(Tenant::new("demo", "https://fhir.example.org/demo", FhirVersion::R4));
        load_bootstrap_resources(&store, dir.path().to_str().unwrap());

        assert!(store.registry().get("Patient").unwrap().instance_read("p1").is_some());
        assert!(store.registry().get("Observation").unwrap().instance_read("o1").is_some());
    }

    #[test]
    fn missing_directory_does_not_panic() {
        let store = TenantStore::new(Tenant::new("demo", "https://fhir.example.org/demo", FhirVersion::R4));
        load_bootstrap_resources(&store, "/nonexistent/bootstrap/dir/for/fhirkit/tests");
    }

    #[test]
    fn build_tenant_stores_rejects_an_unparseable_fhir_version() {
        let tenants = vec![
            TenantConfig {
                controller_name: "demo".into(),
                base_url: "https://fhir.example.org/demo".into(),
                fhir_version: "nonsense".into(),
                bootstrap_dir: None,
                smart_policy: crate::config::SmartPolicyConfig::Allowed,
                max_resource_count: None,
            },
        ];
        assert!(build_tenant_stores(tenants).is_err());
    }
}
