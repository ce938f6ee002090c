//! The Version Adapter capability (spec §4.2, design note §9).
//!
//! This is the *only* place a FHIR-version-specific model family is allowed
//! to appear. Everything above it (store, search, subscriptions) is
//! polymorphic over this trait. Since concrete R4/R4B/R5 resource class
//! hierarchies are an explicit external collaborator (out of scope here),
//! the default implementation works structurally over `serde_json::Value`
//! and is parameterized only by the handful of facts that differ across
//! releases (the `fhirVersion` conformance string, supported mime types).
//!
//! Path evaluation is a small compiled-path cache in front of a FHIRPath
//! subset compiler (design note §9's `PathCompiler`), sufficient for the
//! search-parameter expressions this server evaluates: dotted navigation,
//! `|`-separated polymorphic alternatives, and an optional trailing
//! `as TypeName` / `.ofType(TypeName)` filter.

use crate::error::{CoreError, Result};
use crate::tenant::FhirVersion;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// The wire format a request body was sent in, or should be serialized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mime {
    Json,
    Xml,
}

impl Mime {
    /// Accepts the FHIR mime synonyms named in spec §6:
    /// `application/fhir+json` / `json` / `application/json`,
    /// `application/fhir+xml` / `xml`.
    pub fn from_content_type(value: &str) -> Option<Self> {
        let base = value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase();
        match base.as_str() {
            "application/fhir+json" | "application/json" | "json" | "text/json" | "application/json-patch+json" => Some(Mime::Json),
            "application/fhir+xml" | "application/xml" | "text/xml" | "xml" => Some(Mime::Xml),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Mime::Json => "application/fhir+json",
            Mime::Xml => "application/fhir+xml",
        }
    }
}

/// A typed-element view over a resource, used for path evaluation by the
/// search engine and FHIRPath-criteria evaluation by the subscription
/// engine. For the JSON adapter this is a thin wrapper over `Value`.
#[derive(Debug, Clone)]
pub struct TypedElement(pub Value);

impl TypedElement {
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// Resolves a local reference (`Type/id`) to the typed element of the
/// referenced resource, if it exists. Passed into path evaluation to break
/// the store/adapter reference cycle (design note §9) rather than the
/// adapter holding a pointer back into the store.
pub type ResolverFn<'a> = dyn Fn(&str, &str) -> Option<TypedElement> + 'a;

/// Capability set exposed to the rest of the core (spec §4.2).
pub trait VersionAdapter: Send + Sync {
    fn fhir_version(&self) -> FhirVersion;

    /// Parses bytes in the given wire format into a resource JSON document.
    fn parse(&self, mime: Mime, bytes: &[u8]) -> Result<Value>;

    /// Serializes a resource into the requested wire format.
    fn serialize(&self, resource: &Value, mime: Mime, pretty: bool, summary: bool) -> Result<Vec<u8>>;

    fn type_name(resource: &Value) -> Option<&str>
    where
        Self: Sized,
    {
        resource.get("resourceType").and_then(Value::as_str)
    }

    fn id(resource: &Value) -> Option<&str>
    where
        Self: Sized,
    {
        resource.get("id").and_then(Value::as_str)
    }

    fn to_typed_element(&self, resource: Value) -> TypedElement {
        TypedElement::from_value(resource)
    }

    /// Evaluates `path` against `element`, resolving references through
    /// `resolver` where the path crosses a reference boundary (`resolve()`).
    fn evaluate_path(&self, element: &TypedElement, path: &str, resolver: &ResolverFn) -> Vec<TypedElement>;

    /// Extracts the `Type/id` string carried by a `Reference` typed element,
    /// if any (`{"reference": "Patient/123"}`).
    fn extract_reference(&self, element: &TypedElement) -> Option<String> {
        element
            .as_value()
            .get("reference")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Structural JSON adapter shared by the R4 / R4B / R5 markers. Path
/// expressions are compiled once and cached in a concurrent map keyed by the
/// raw expression string (design note §9).
pub struct JsonVersionAdapter {
    version: FhirVersion,
    path_cache: RwLock<HashMap<String, Arc<CompiledPath>>>,
}

impl JsonVersionAdapter {
    pub fn new(version: FhirVersion) -> Self {
        Self {
            version,
            path_cache: RwLock::new(HashMap::new()),
        }
    }

    fn compiled(&self, path: &str) -> Arc<CompiledPath> {
        if let Some(hit) = self.path_cache.read().unwrap().get(path) {
            return hit.clone();
        }
        let compiled = Arc::new(CompiledPath::compile(path));
        self.path_cache
            .write()
            .unwrap()
            .insert(path.to_string(), compiled.clone());
        compiled
    }
}

impl VersionAdapter for JsonVersionAdapter {
    fn fhir_version(&self) -> FhirVersion {
        self.version
    }

    fn parse(&self, mime: Mime, bytes: &[u8]) -> Result<Value> {
        match mime {
            Mime::Json => serde_json::from_slice(bytes).map_err(CoreError::from),
            // XML bodies are accepted at the negotiation layer (tenants may
            // advertise `application/fhir+xml`) but this server's adapter
            // only speaks JSON on the wire; xml-bodied requests are rejected
            // here rather than pretending to round-trip them.
            Mime::Xml => Err(CoreError::UnsupportedMediaType(
                "application/fhir+xml request bodies are not supported".to_string(),
            )),
        }
    }

    fn serialize(&self, resource: &Value, mime: Mime, pretty: bool, summary: bool) -> Result<Vec<u8>> {
        let value = if summary { summarize(resource) } else { resource.clone() };
        match mime {
            Mime::Json => {
                if pretty {
                    serde_json::to_vec_pretty(&value).map_err(CoreError::from)
                } else {
                    serde_json::to_vec(&value).map_err(CoreError::from)
                }
            }
            Mime::Xml => Err(CoreError::UnsupportedMediaType(
                "application/fhir+xml responses are not supported".to_string(),
            )),
        }
    }

    fn evaluate_path(&self, element: &TypedElement, path: &str, resolver: &ResolverFn) -> Vec<TypedElement> {
        let compiled = self.compiled(path);
        compiled.evaluate(element.as_value(), resolver)
    }
}

/// `_summary=true` strips everything but `id`, `meta`, and any element
/// tagged `isSummary` in the base spec's mandatory-summary set; since we
/// don't carry StructureDefinitions here we fall back to a conservative
/// top-level subset covering the fields search results usually key off.
fn summarize(resource: &Value) -> Value {
    const SUMMARY_FIELDS: &[&str] = &["resourceType", "id", "meta", "text", "identifier", "status"];
    match resource.as_object() {
        Some(obj) => {
            let mut out = serde_json::Map::new();
            for field in SUMMARY_FIELDS {
                if let Some(v) = obj.get(*field) {
                    out.insert(field.to_string(), v.clone());
                }
            }
            Value::Object(out)
        }
        None => resource.clone(),
    }
}

/// One `|`-separated alternative of a compiled path: a dotted segment list
/// plus an optional trailing type filter (`as Quantity`, `.ofType(Quantity)`).
struct PathAlternative {
    segments: Vec<String>,
    type_filter: Option<String>,
}

struct CompiledPath {
    alternatives: Vec<PathAlternative>,
}

impl CompiledPath {
    fn compile(path: &str) -> Self {
        let alternatives = path
            .split('|')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::compile_alternative)
            .collect();
        Self { alternatives }
    }

    fn compile_alternative(expr: &str) -> PathAlternative {
        let mut expr = expr.trim().to_string();
        let mut type_filter = None;

        if let Some(idx) = expr.find(" as ") {
            type_filter = Some(expr[idx + 4..].trim().to_string());
            expr.truncate(idx);
        }
        if let Some(start) = expr.find(".ofType(") {
            if let Some(end) = expr[start..].find(')') {
                type_filter = Some(expr[start + 8..start + end].trim().to_string());
                expr.truncate(start);
            }
        }

        // Strip a leading `ResourceType.` root segment; search expressions are
        // always written relative to the resource under evaluation.
        let segments: Vec<String> = expr
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let segments = if segments.len() > 1 {
            segments.into_iter().skip(1).collect()
        } else {
            segments
        };

        PathAlternative { segments, type_filter }
    }

    fn evaluate(&self, root: &Value, resolver: &ResolverFn) -> Vec<TypedElement> {
        let mut out = Vec::new();
        for alt in &self.alternatives {
            let mut current = vec![root.clone()];
            for segment in &alt.segments {
                if segment == "resolve()" {
                    current = current
                        .iter()
                        .filter_map(|v| v.get("reference").and_then(Value::as_str))
                        .filter_map(|r| crate::reference::parse_reference(r, None).ok())
                        .filter_map(|r| resolver(&r.resource_type, &r.id))
                        .map(|e| e.0)
                        .collect();
                    continue;
                }
                current = current
                    .iter()
                    .flat_map(|v| step(v, segment))
                    .collect();
            }
            for v in current {
                if let Some(filter) = &alt.type_filter {
                    if type_matches(&v, filter) {
                        out.push(TypedElement::from_value(v));
                    }
                } else {
                    out.push(TypedElement::from_value(v));
                }
            }
        }
        out
    }
}

fn step(value: &Value, field: &str) -> Vec<Value> {
    match value {
        Value::Object(map) => match map.get(field) {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        },
        Value::Array(items) => items.iter().flat_map(|v| step(v, field)).collect(),
        _ => Vec::new(),
    }
}

/// Best-effort `as`/`ofType` type match: Quantity/Money/Range-family share a
/// `value`+`unit` shape while CodeableConcept/Coding carry `coding`/`system`.
fn type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "Quantity" | "Money" | "Range" => value.get("value").is_some(),
        "CodeableConcept" => value.get("coding").is_some() || value.get("text").is_some(),
        "Coding" => value.get("system").is_some() || value.get("code").is_some(),
        "Reference" => value.get("reference").is_some(),
        "string" | "String" => value.is_string(),
        "boolean" | "Boolean" => value.is_boolean(),
        "dateTime" | "date" | "instant" => value.is_string(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_resolver<'a>() -> impl Fn(&str, &str) -> Option<TypedElement> + 'a {
        |_, _| None
    }

    #[test]
    fn mime_synonyms_resolve() {
        assert_eq!(Mime::from_content_type("application/fhir+json"), Some(Mime::Json));
        assert_eq!(Mime::from_content_type("json"), Some(Mime::Json));
        assert_eq!(Mime::from_content_type("application/json; charset=utf-8"), Some(Mime::Json));
        assert_eq!(Mime::from_content_type("xml"), Some(Mime::Xml));
        assert_eq!(Mime::from_content_type("text/plain"), None);
    }

    #[test]
    fn evaluates_dotted_path() {
        let adapter = JsonVersionAdapter::new(FhirVersion::R4);
        let elem = TypedElement::from_value(json!({
            "resourceType": "Patient",
            "name": [{"given": ["Peter"], "family": "Parker"}],
        }));
        let resolver = noop_resolver();
        let result = adapter.evaluate_path(&elem, "Patient.name.given", &resolver);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_value(), &json!(["Peter"]));
    }

    #[test]
    fn evaluates_polymorphic_alternatives() {
        let adapter = JsonVersionAdapter::new(FhirVersion::R4);
        let elem = TypedElement::from_value(json!({
            "resourceType": "Observation",
            "valueQuantity": {"value": 185, "unit": "[lb_av]"},
        }));
        let resolver = noop_resolver();
        let result = adapter.evaluate_path(
            &elem,
            "Observation.valueQuantity as Quantity | Observation.valueString",
            &resolver,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_value()["value"], 185);
    }

    #[test]
    fn caches_compiled_paths() {
        let adapter = JsonVersionAdapter::new(FhirVersion::R4);
        let elem = TypedElement::from_value(json!({"status": "active"}));
        let resolver = noop_resolver();
        let _ = adapter.evaluate_path(&elem, "Patient.status", &resolver);
        let _ = adapter.evaluate_path(&elem, "Patient.status", &resolver);
        assert_eq!(adapter.path_cache.read().unwrap().len(), 1);
    }
}
