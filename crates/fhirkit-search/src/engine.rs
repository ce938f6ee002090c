//! The Search Engine (spec §4.4, C4): ties Stage A/B/C together against a
//! tenant's [`ResourceStoreRegistry`], producing a `searchset` `Bundle`.

use crate::parse::{IncludeSpec, ParsedQuery, ParsedSearchParameter, SortSpec};
use crate::predicate;
use fhirkit_core::adapter::{TypedElement, VersionAdapter};
use fhirkit_core::error::Result;
use fhirkit_core::reference::parse_reference;
use fhirkit_core::resource::StoredResource;
use fhirkit_store::registry::ResourceStoreRegistry;
use fhirkit_store::search_param::{SearchParamDefinition, SearchParamType};
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Match,
    Include,
}

#[derive(Debug, Clone)]
pub struct SearchEntry {
    pub resource: StoredResource,
    pub mode: EntryMode,
}

fn synthetic_definition(resource_type: &str, name: &str) -> Option<SearchParamDefinition> {
    match name {
        "_id" => Some(SearchParamDefinition::new(
            "_id",
            resource_type,
            SearchParamType::Token,
            format!("{resource_type}.id"),
        )),
        "_lastUpdated" => Some(SearchParamDefinition::new(
            "_lastUpdated",
            resource_type,
            SearchParamType::Date,
            format!("{resource_type}.meta.lastUpdated"),
        )),
        _ => None,
    }
}

fn lookup_definition(registry: &ResourceStoreRegistry, resource_type: &str, name: &str) -> Option<SearchParamDefinition> {
    synthetic_definition(resource_type, name)
        .or_else(|| registry.get(resource_type).and_then(|store| store.search_parameter(name)))
}

/// Recursively evaluates a (possibly chained) parameter against one root
/// resource, resolving reference hops through the registry.
fn resource_matches(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    param: &ParsedSearchParameter,
    resource_type: &str,
    root: &TypedElement,
) -> bool {
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };

    if !param.is_chained() {
        let Some(def) = lookup_definition(registry, resource_type, param.top_level_name()) else {
            return false;
        };
        return predicate::evaluate(adapter, &def, param, root, &resolver);
    }

    let hop = &param.segments[0];
    let Some(ref_def) = lookup_definition(registry, resource_type, &hop.name) else {
        return false;
    };
    let ref_elements = adapter.evaluate_path(root, &ref_def.expression, &resolver);
    let type_restriction = match &hop.modifier {
        crate::modifier::Modifier::ResourceTypeQualifier(t) => Some(t.clone()),
        _ => ref_def.target_types.first().cloned(),
    };

    for element in &ref_elements {
        let Some(reference_str) = adapter.extract_reference(element) else {
            continue;
        };
        let Ok(parsed_ref) = parse_reference(&reference_str, None) else {
            continue;
        };
        if let Some(restriction) = &type_restriction {
            if &parsed_ref.resource_type != restriction {
                continue;
            }
        }
        let Some(store) = registry.get(&parsed_ref.resource_type) else {
            continue;
        };
        let Some(referent) = store.instance_read(&parsed_ref.id) else {
            continue;
        };
        let referent_elem = adapter.to_typed_element(referent.body.clone());
        let remaining = ParsedSearchParameter {
            segments: param.segments[1..].to_vec(),
            values: param.values.clone(),
            raw: param.raw.clone(),
        };
        if resource_matches(adapter, registry, &remaining, &parsed_ref.resource_type, &referent_elem) {
            return true;
        }
    }
    false
}

fn sort_key(adapter: &dyn VersionAdapter, registry: &ResourceStoreRegistry, sort: &SortSpec, resource: &StoredResource) -> String {
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };
    let Some(def) = lookup_definition(registry, &resource.resource_type, &sort.param) else {
        return String::new();
    };
    let root = TypedElement::from_value(resource.body.clone());
    let elements = adapter.evaluate_path(&root, &def.expression, &resolver);
    elements
        .first()
        .and_then(|e| e.as_value().as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Runs a type-level search and assembles a `searchset` `Bundle` JSON
/// document (spec §4.4 Stage C).
pub fn execute_search(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    resource_type: &str,
    query: &ParsedQuery,
    base_url: &str,
    self_query: &str,
) -> Result<Value> {
    let candidates = registry.get_or_create(resource_type).all();

    let mut matches: Vec<StoredResource> = candidates
        .into_iter()
        .filter(|resource| {
            let root = TypedElement::from_value(resource.body.clone());
            query
                .params
                .iter()
                .all(|param| resource_matches(adapter, registry, param, resource_type, &root))
        })
        .collect();

    if !query.result.sort.is_empty() {
        matches.sort_by(|a, b| {
            for sort in &query.result.sort {
                let ka = sort_key(adapter, registry, sort, a);
                let kb = sort_key(adapter, registry, sort, b);
                let ordering = if sort.descending { kb.cmp(&ka) } else { ka.cmp(&kb) };
                if ordering != std::cmp::Ordering::Equal {
                    return ordering;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    let mut seen: HashSet<(String, String)> = matches.iter().map(|r| (r.resource_type.clone(), r.id.clone())).collect();
    let mut entries: Vec<SearchEntry> = matches
        .into_iter()
        .map(|resource| SearchEntry { resource, mode: EntryMode::Match })
        .collect();

    let total = entries.len();

    let include_additions = collect_includes(adapter, registry, &query.result.includes, &entries, &seen);
    merge_additions(&mut entries, &mut seen, include_additions);

    // Reverse-include adds the resource the search *found* through the
    // internal reverse lookup, never the focus resource it links back to.
    let revinclude_additions = collect_revincludes(registry, &query.result.revincludes, &entries, &seen);
    merge_additions(&mut entries, &mut seen, revinclude_additions);

    Ok(build_bundle(base_url, resource_type, self_query, total, &entries))
}

fn collect_includes(
    adapter: &dyn VersionAdapter,
    registry: &ResourceStoreRegistry,
    includes: &[IncludeSpec],
    entries: &[SearchEntry],
    seen: &HashSet<(String, String)>,
) -> Vec<StoredResource> {
    let resolver = |rt: &str, id: &str| -> Option<TypedElement> {
        registry
            .get(rt)
            .and_then(|store| store.instance_read(id))
            .map(|stored| adapter.to_typed_element(stored.body))
    };

    let mut additions = Vec::new();
    let mut local_seen = seen.clone();

    for include in includes {
        let Some(def) = lookup_definition(registry, &include.source_type, &include.param) else {
            continue;
        };
        for entry in entries.iter().filter(|e| e.resource.resource_type == include.source_type) {
            let root = TypedElement::from_value(entry.resource.body.clone());
            let elements = adapter.evaluate_path(&root, &def.expression, &resolver);
            for element in elements {
                let Some(reference_str) = adapter.extract_reference(&element) else { continue };
                let Ok(parsed_ref) = parse_reference(&reference_str, None) else { continue };
                if let Some(target) = &include.target_type {
                    if &parsed_ref.resource_type != target {
                        continue;
                    }
                }
                let key = (parsed_ref.resource_type.clone(), parsed_ref.id.clone());
                if local_seen.contains(&key) {
                    continue;
                }
                if let Some(store) = registry.get(&parsed_ref.resource_type) {
                    if let Some(resolved) = store.instance_read(&parsed_ref.id) {
                        local_seen.insert(key);
                        additions.push(resolved);
                    }
                }
            }
        }
    }
    additions
}

/// For each `_revinclude=R:p[:T]`, scans `R`'s store for resources whose `p`
/// expression references one of the current matches, and adds the *found*
/// referencing resource — not the match it points back to.
fn collect_revincludes(
    registry: &ResourceStoreRegistry,
    revincludes: &[IncludeSpec],
    entries: &[SearchEntry],
    seen: &HashSet<(String, String)>,
) -> Vec<StoredResource> {
    let mut additions = Vec::new();
    let mut local_seen = seen.clone();

    for revinclude in revincludes {
        let Some(referencing_store) = registry.get(&revinclude.source_type) else {
            continue;
        };
        let Some(def) = referencing_store.search_parameter(&revinclude.param) else {
            continue;
        };
        for entry in entries.iter().filter(|e| e.mode == EntryMode::Match) {
            if let Some(target) = &revinclude.target_type {
                if target != &entry.resource.resource_type {
                    continue;
                }
            }
            let match_ref = format!("{}/{}", entry.resource.resource_type, entry.resource.id);
            for candidate in referencing_store.all() {
                let key = (candidate.resource_type.clone(), candidate.id.clone());
                if local_seen.contains(&key) {
                    continue;
                }
                let root = TypedElement::from_value(candidate.body.clone());
                let elements = simple_select(&root, &def.expression);
                let references_match = elements.iter().any(|e| {
                    e.as_value()
                        .get("reference")
                        .and_then(Value::as_str)
                        .map(|r| r == match_ref)
                        .unwrap_or(false)
                });
                if references_match {
                    local_seen.insert(key);
                    additions.push(candidate);
                }
            }
        }
    }
    additions
}

/// A dependency-free structural path stepper used only by revinclude, which
/// never needs `resolve()` or polymorphic alternatives — just the plain
/// dotted path on the referencing resource itself.
fn simple_select(root: &TypedElement, expression: &str) -> Vec<TypedElement> {
    let segments: Vec<&str> = expression.split('.').skip(1).collect();
    let mut current = vec![root.as_value().clone()];
    for segment in segments {
        current = current
            .iter()
            .flat_map(|v| match v {
                Value::Object(map) => match map.get(segment) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(other) => vec![other.clone()],
                    None => Vec::new(),
                },
                Value::Array(items) => items.iter().filter_map(|i| i.get(segment).cloned()).collect(),
                _ => Vec::new(),
            })
            .collect();
    }
    current.into_iter().map(TypedElement::from_value).collect()
}

fn merge_additions(entries: &mut Vec<SearchEntry>, seen: &mut HashSet<(String, String)>, additions: Vec<StoredResource>) {
    for resource in additions {
        let key = (resource.resource_type.clone(), resource.id.clone());
        if seen.contains(&key) {
            continue;
        }
        seen.insert(key);
        entries.push(SearchEntry { resource, mode: EntryMode::Include });
    }
}

fn build_bundle(base_url: &str, resource_type: &str, self_query: &str, total: usize, entries: &[SearchEntry]) -> Value {
    let base = base_url.trim_end_matches('/');
    let self_link = if self_query.is_empty() {
        format!("{base}/{resource_type}")
    } else {
        format!("{base}/{resource_type}?{self_query}")
    };

    json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": total,
        "link": [{"relation": "self", "url": self_link}],
        "entry": entries.iter().map(|e| json!({
            "fullUrl": format!("{base}/{}/{}", e.resource.resource_type, e.resource.id),
            "resource": e.resource.body,
            "search": {"mode": match e.mode { EntryMode::Match => "match", EntryMode::Include => "include" }},
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_query;
    use fhirkit_core::adapter::JsonVersionAdapter;
    use fhirkit_core::events::EventBroadcaster;
    use fhirkit_core::tenant::FhirVersion;
    use serde_json::json;

    fn setup() -> (JsonVersionAdapter, ResourceStoreRegistry) {
        let adapter = JsonVersionAdapter::new(FhirVersion::R4);
        let registry = ResourceStoreRegistry::new(EventBroadcaster::default(), None);
        let patients = registry.get_or_create("Patient");
        patients.set_executable_search_parameter(SearchParamDefinition::new(
            "gender",
            "Patient",
            SearchParamType::Token,
            "Patient.gender",
        ));
        for (id, gender) in [("p1", "male"), ("p2", "male"), ("p3", "female"), ("p4", "male"), ("p5", "female")] {
            patients.instance_create(Some(id), true, json!({"gender": gender})).unwrap();
        }
        (adapter, registry)
    }

    #[test]
    fn filters_by_token_gender() {
        let (adapter, registry) = setup();
        let query = parse_query("gender=male").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "gender=male").unwrap();
        assert_eq!(bundle["total"], 3);
    }

    #[test]
    fn comma_is_or() {
        let (adapter, registry) = setup();
        let query = parse_query("gender=male,female").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "gender=male,female").unwrap();
        assert_eq!(bundle["total"], 5);
    }

    #[test]
    fn unknown_value_returns_zero() {
        let (adapter, registry) = setup();
        let query = parse_query("gender=InvalidValue").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "gender=InvalidValue").unwrap();
        assert_eq!(bundle["total"], 0);
    }

    #[test]
    fn revinclude_adds_the_found_referencing_resource_not_the_focus() {
        let (adapter, registry) = setup();
        let observations = registry.get_or_create("Observation");
        observations.set_executable_search_parameter(SearchParamDefinition::new(
            "patient",
            "Observation",
            SearchParamType::Reference,
            "Observation.subject",
        ));
        observations
            .instance_create(Some("o1"), true, json!({"subject": {"reference": "Patient/p1"}}))
            .unwrap();

        let query = parse_query("_id=p1&_revinclude=Observation:patient").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "_id=p1").unwrap();
        assert_eq!(bundle["total"], 1);
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        let included = entries.iter().find(|e| e["search"]["mode"] == "include").unwrap();
        assert_eq!(included["resource"]["resourceType"], "Observation");
        assert_eq!(included["resource"]["id"], "o1");
    }

    #[test]
    fn include_never_duplicates_entries() {
        let (adapter, registry) = setup();
        let organizations = registry.get_or_create("Organization");
        organizations.instance_create(Some("org1"), true, json!({"name": "Acme"})).unwrap();
        let patients = registry.get_or_create("Patient");
        patients.set_executable_search_parameter(SearchParamDefinition::new(
            "organization",
            "Patient",
            SearchParamType::Reference,
            "Patient.managingOrganization",
        ));
        patients
            .instance_create(
                Some("p6"),
                true,
                json!({"gender": "male", "managingOrganization": {"reference": "Organization/org1"}}),
            )
            .unwrap();

        let query = parse_query("_id=p6&_include=Patient:organization").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "_id=p6").unwrap();
        let entries = bundle["entry"].as_array().unwrap();
        let mut keys = HashSet::new();
        for e in entries {
            let rt = e["resource"]["resourceType"].as_str().unwrap();
            let id = e["resource"]["id"].as_str().unwrap();
            assert!(keys.insert((rt.to_string(), id.to_string())));
        }
    }

    #[test]
    fn chained_reference_parameter_filters_on_referent_field() {
        let (adapter, registry) = setup();
        let organizations = registry.get_or_create("Organization");
        organizations.set_executable_search_parameter(SearchParamDefinition::new(
            "name",
            "Organization",
            SearchParamType::String,
            "Organization.name",
        ));
        organizations.instance_create(Some("org1"), true, json!({"name": "Acme Clinic"})).unwrap();
        organizations.instance_create(Some("org2"), true, json!({"name": "Other Clinic"})).unwrap();

        let patients = registry.get_or_create("Patient");
        patients.set_executable_search_parameter(SearchParamDefinition::new(
            "organization",
            "Patient",
            SearchParamType::Reference,
            "Patient.managingOrganization",
        ));
        patients
            .instance_create(Some("p7"), true, json!({"managingOrganization": {"reference": "Organization/org1"}}))
            .unwrap();
        patients
            .instance_create(Some("p8"), true, json!({"managingOrganization": {"reference": "Organization/org2"}}))
            .unwrap();

        let query = parse_query("organization.name=acme").unwrap();
        let bundle = execute_search(&adapter, &registry, "Patient", &query, "https://x/demo", "organization.name=acme").unwrap();
        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["resource"]["id"], "p7");
    }
}
