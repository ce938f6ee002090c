//! The interaction parser (spec §4.1, C1): maps `(method, url)` onto a typed
//! [`Interaction`] against a tenant's known resource types. This is the
//! front door every request passes through before the Tenant Store
//! dispatches into the resource store, search engine, or subscription
//! engine.

use std::fmt;

/// The full tagged set of interactions this server recognizes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interaction {
    SystemSearch,
    SystemHistory,
    SystemCapabilities,
    SystemBundle,
    SystemOperation,
    SystemDeleteConditional,
    TypeSearch,
    TypeCreate,
    TypeCreateConditional,
    TypeDeleteConditional,
    TypeOperation,
    InstanceRead,
    InstanceReadVersion,
    InstanceReadHistory,
    InstanceUpdate,
    InstanceUpdateConditional,
    InstancePatch,
    InstancePatchConditional,
    InstanceDelete,
    InstanceDeleteHistory,
    InstanceDeleteVersion,
    InstanceOperation,
    CompartmentSearch,
    CompartmentTypeSearch,
    CompartmentOperation,
}

/// A successfully parsed interaction, carrying whichever of the optional
/// coordinates (spec §3) apply to its variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInteraction {
    pub interaction: Interaction,
    pub resource_type: Option<String>,
    pub id: Option<String>,
    pub version: Option<String>,
    pub operation_name: Option<String>,
    pub compartment_type: Option<String>,
    /// Raw query string (without leading `?`), preserved verbatim so the
    /// printer can round-trip and so conditional-interaction handlers can
    /// read the search criteria without re-deriving them.
    pub query: String,
}

/// Returned on any of the parser's three failure modes (spec §4.1): unknown
/// method, unrecognized URL shape, or a URL whose authority doesn't match
/// the tenant's configured base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionParseError {
    pub http_method: String,
    pub url_path: String,
    pub url_query: String,
    pub reason: String,
}

impl fmt::Display for InteractionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot parse interaction for {} {}: {}",
            self.http_method, self.url_path, self.reason
        )
    }
}

impl std::error::Error for InteractionParseError {}

/// Result-parameter / control-parameter names that do not count toward
/// conditional-interaction detection (spec §4.1).
const CONTROL_PARAMS: &[&str] = &[
    "_format",
    "_pretty",
    "_summary",
    "_elements",
    "_count",
    "_sort",
    "_include",
    "_revinclude",
    "_total",
    "_contained",
    "_containedType",
    "_since",
    "_at",
    "_list",
    "_page",
];

fn has_query_criteria(query: &str) -> bool {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split('=').next().unwrap_or(""))
        .any(|key| !CONTROL_PARAMS.contains(&key))
}

/// Parses `(method, url)` against `base_url` and `is_known_type`, the
/// predicate the parser uses to decide whether a leading path segment names
/// a resource type (spec §4.1: "the first segment is a resource type iff
/// the tenant store knows it").
pub fn parse_interaction(
    method: &str,
    url: &str,
    base_url: &str,
    is_known_type: impl Fn(&str) -> bool,
) -> Result<ParsedInteraction, InteractionParseError> {
    let method = method.to_ascii_uppercase();
    let base = base_url.trim_end_matches('/');

    let stripped = if url.contains("://") {
        if let Some(rest) = url.strip_prefix(base) {
            rest
        } else {
            return Err(InteractionParseError {
                http_method: method,
                url_path: url.to_string(),
                url_query: String::new(),
                reason: "URL authority does not match tenant base URL".to_string(),
            });
        }
    } else {
        url
    };

    let (path, query) = match stripped.split_once('?') {
        Some((p, q)) => (p, q),
        None => (stripped, ""),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let err = |reason: &str| InteractionParseError {
        http_method: method.clone(),
        url_path: path.to_string(),
        url_query: query.to_string(),
        reason: reason.to_string(),
    };

    let base_result = |interaction: Interaction| ParsedInteraction {
        interaction,
        resource_type: None,
        id: None,
        version: None,
        operation_name: None,
        compartment_type: None,
        query: query.to_string(),
    };

    match segments.as_slice() {
        [] => match method.as_str() {
            "GET" => Ok(base_result(Interaction::SystemSearch)),
            "POST" => Ok(base_result(Interaction::SystemBundle)),
            "DELETE" if has_query_criteria(query) => Ok(base_result(Interaction::SystemDeleteConditional)),
            _ => Err(err("unsupported method at system root")),
        },
        ["metadata"] => match method.as_str() {
            "GET" | "HEAD" => Ok(base_result(Interaction::SystemCapabilities)),
            _ => Err(err("metadata only supports GET/HEAD")),
        },
        ["_history"] => match method.as_str() {
            "GET" => Ok(base_result(Interaction::SystemHistory)),
            _ => Err(err("system history only supports GET")),
        },
        [op] if op.starts_with('$') => match method.as_str() {
            "GET" | "POST" => Ok(ParsedInteraction {
                operation_name: Some(op.trim_start_matches('$').to_string()),
                ..base_result(Interaction::SystemOperation)
            }),
            _ => Err(err("system operation only supports GET/POST")),
        },
        [rt] if is_known_type(rt) => match method.as_str() {
            "GET" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                ..base_result(Interaction::TypeSearch)
            }),
            "POST" if has_query_criteria(query) => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                ..base_result(Interaction::TypeCreateConditional)
            }),
            "POST" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                ..base_result(Interaction::TypeCreate)
            }),
            "DELETE" if has_query_criteria(query) => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                ..base_result(Interaction::TypeDeleteConditional)
            }),
            _ => Err(err("type-level delete requires search criteria")),
        },
        [rt, "_search"] if is_known_type(rt) => match method.as_str() {
            "POST" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                ..base_result(Interaction::TypeSearch)
            }),
            _ => Err(err("_search only supports POST")),
        },
        [rt, op] if is_known_type(rt) && op.starts_with('$') => match method.as_str() {
            "GET" | "POST" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                operation_name: Some(op.trim_start_matches('$').to_string()),
                ..base_result(Interaction::TypeOperation)
            }),
            _ => Err(err("type operation only supports GET/POST")),
        },
        [rt, id] if is_known_type(rt) => match method.as_str() {
            "GET" | "HEAD" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceRead)
            }),
            "PUT" if has_query_criteria(query) => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceUpdateConditional)
            }),
            "PUT" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceUpdate)
            }),
            "PATCH" if has_query_criteria(query) => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstancePatchConditional)
            }),
            "PATCH" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstancePatch)
            }),
            "DELETE" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceDelete)
            }),
            _ => Err(err("unsupported method at instance level")),
        },
        [rt, id, "_history"] if is_known_type(rt) => match method.as_str() {
            "GET" | "HEAD" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceReadHistory)
            }),
            "DELETE" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::InstanceDeleteHistory)
            }),
            _ => Err(err("instance history only supports GET/HEAD/DELETE")),
        },
        [rt, id, op] if is_known_type(rt) && op.starts_with('$') => match method.as_str() {
            "GET" | "POST" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                operation_name: Some(op.trim_start_matches('$').to_string()),
                ..base_result(Interaction::InstanceOperation)
            }),
            _ => Err(err("instance operation only supports GET/POST")),
        },
        [rt, id, "*"] if is_known_type(rt) => match method.as_str() {
            "GET" => Ok(ParsedInteraction {
                compartment_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                ..base_result(Interaction::CompartmentSearch)
            }),
            _ => Err(err("compartment search only supports GET")),
        },
        [rt, id, rt2] if is_known_type(rt) && is_known_type(rt2) => match method.as_str() {
            "GET" => Ok(ParsedInteraction {
                compartment_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                resource_type: Some(rt2.to_string()),
                ..base_result(Interaction::CompartmentTypeSearch)
            }),
            _ => Err(err("compartment type search only supports GET")),
        },
        [rt, id, "_history", vid] if is_known_type(rt) => match method.as_str() {
            "GET" | "HEAD" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                version: Some(vid.to_string()),
                ..base_result(Interaction::InstanceReadVersion)
            }),
            "DELETE" => Ok(ParsedInteraction {
                resource_type: Some(rt.to_string()),
                id: Some(id.to_string()),
                version: Some(vid.to_string()),
                ..base_result(Interaction::InstanceDeleteVersion)
            }),
            _ => Err(err("versioned instance only supports GET/HEAD/DELETE")),
        },
        [rt, id, rt2, op] if is_known_type(rt) && is_known_type(rt2) && op.starts_with('$') => {
            match method.as_str() {
                "GET" | "POST" => Ok(ParsedInteraction {
                    compartment_type: Some(rt.to_string()),
                    id: Some(id.to_string()),
                    resource_type: Some(rt2.to_string()),
                    operation_name: Some(op.trim_start_matches('$').to_string()),
                    ..base_result(Interaction::CompartmentOperation)
                }),
                _ => Err(err("compartment operation only supports GET/POST")),
            }
        }
        _ => Err(err("unrecognized URL shape")),
    }
}

impl ParsedInteraction {
    /// Reconstructs `(method, url)` such that reparsing yields an identical
    /// [`ParsedInteraction`] (spec §8 invariant 6).
    pub fn to_method_and_url(&self) -> (String, String) {
        let mut path = String::new();
        let method;

        match self.interaction {
            Interaction::SystemSearch => {
                method = "GET";
            }
            Interaction::SystemBundle => {
                method = "POST";
            }
            Interaction::SystemDeleteConditional => {
                method = "DELETE";
            }
            Interaction::SystemHistory => {
                method = "GET";
                path.push_str("_history");
            }
            Interaction::SystemCapabilities => {
                method = "GET";
                path.push_str("metadata");
            }
            Interaction::SystemOperation => {
                method = "GET";
                path.push('$');
                path.push_str(self.operation_name.as_deref().unwrap_or(""));
            }
            Interaction::TypeSearch => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
            }
            Interaction::TypeCreate => {
                method = "POST";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
            }
            Interaction::TypeCreateConditional => {
                method = "POST";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
            }
            Interaction::TypeDeleteConditional => {
                method = "DELETE";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
            }
            Interaction::TypeOperation => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push_str("/$");
                path.push_str(self.operation_name.as_deref().unwrap_or(""));
            }
            Interaction::InstanceRead => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
            }
            Interaction::InstanceUpdate | Interaction::InstanceUpdateConditional => {
                method = "PUT";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
            }
            Interaction::InstancePatch | Interaction::InstancePatchConditional => {
                method = "PATCH";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
            }
            Interaction::InstanceDelete => {
                method = "DELETE";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
            }
            Interaction::InstanceReadHistory => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/_history");
            }
            Interaction::InstanceDeleteHistory => {
                method = "DELETE";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/_history");
            }
            Interaction::InstanceReadVersion => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/_history/");
                path.push_str(self.version.as_deref().unwrap_or(""));
            }
            Interaction::InstanceDeleteVersion => {
                method = "DELETE";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/_history/");
                path.push_str(self.version.as_deref().unwrap_or(""));
            }
            Interaction::InstanceOperation => {
                method = "GET";
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/$");
                path.push_str(self.operation_name.as_deref().unwrap_or(""));
            }
            Interaction::CompartmentSearch => {
                method = "GET";
                path.push_str(self.compartment_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push_str("/*");
            }
            Interaction::CompartmentTypeSearch => {
                method = "GET";
                path.push_str(self.compartment_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
            }
            Interaction::CompartmentOperation => {
                method = "GET";
                path.push_str(self.compartment_type.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.id.as_deref().unwrap_or(""));
                path.push('/');
                path.push_str(self.resource_type.as_deref().unwrap_or(""));
                path.push_str("/$");
                path.push_str(self.operation_name.as_deref().unwrap_or(""));
            }
        }

        if self.query.is_empty() {
            (method.to_string(), format!("/{path}"))
        } else {
            (method.to_string(), format!("/{path}?{}", self.query))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(rt: &str) -> bool {
        matches!(rt, "Patient" | "Observation" | "Encounter")
    }

    #[test]
    fn parses_system_search() {
        let parsed = parse_interaction("GET", "/", "https://fhir.example.org/demo", known).unwrap();
        assert_eq!(parsed.interaction, Interaction::SystemSearch);
    }

    #[test]
    fn parses_type_search() {
        let parsed = parse_interaction("GET", "/Patient", "https://fhir.example.org/demo", known).unwrap();
        assert_eq!(parsed.interaction, Interaction::TypeSearch);
        assert_eq!(parsed.resource_type.as_deref(), Some("Patient"));
    }

    #[test]
    fn distinguishes_create_from_conditional_create() {
        let plain = parse_interaction("POST", "/Patient", "https://x", known).unwrap();
        assert_eq!(plain.interaction, Interaction::TypeCreate);

        let conditional =
            parse_interaction("POST", "/Patient?identifier=123", "https://x", known).unwrap();
        assert_eq!(conditional.interaction, Interaction::TypeCreateConditional);

        // Control params alone do not trigger conditionality.
        let still_plain = parse_interaction("POST", "/Patient?_format=json", "https://x", known).unwrap();
        assert_eq!(still_plain.interaction, Interaction::TypeCreate);
    }

    #[test]
    fn distinguishes_update_from_conditional_update() {
        let plain = parse_interaction("PUT", "/Patient/1", "https://x", known).unwrap();
        assert_eq!(plain.interaction, Interaction::InstanceUpdate);

        let conditional = parse_interaction("PUT", "/Patient/1?identifier=123", "https://x", known).unwrap();
        assert_eq!(conditional.interaction, Interaction::InstanceUpdateConditional);
    }

    #[test]
    fn parses_instance_read_version() {
        let parsed = parse_interaction("GET", "/Patient/1/_history/2", "https://x", known).unwrap();
        assert_eq!(parsed.interaction, Interaction::InstanceReadVersion);
        assert_eq!(parsed.version.as_deref(), Some("2"));
    }

    #[test]
    fn parses_compartment_search() {
        let parsed = parse_interaction("GET", "/Patient/1/*", "https://x", known).unwrap();
        assert_eq!(parsed.interaction, Interaction::CompartmentSearch);
        assert_eq!(parsed.compartment_type.as_deref(), Some("Patient"));
    }

    #[test]
    fn parses_compartment_type_search() {
        let parsed = parse_interaction("GET", "/Patient/1/Observation", "https://x", known).unwrap();
        assert_eq!(parsed.interaction, Interaction::CompartmentTypeSearch);
        assert_eq!(parsed.resource_type.as_deref(), Some("Observation"));
    }

    #[test]
    fn parses_operations() {
        let sys = parse_interaction("POST", "/$export", "https://x", known).unwrap();
        assert_eq!(sys.interaction, Interaction::SystemOperation);
        assert_eq!(sys.operation_name.as_deref(), Some("export"));

        let instance = parse_interaction("POST", "/Patient/1/$everything", "https://x", known).unwrap();
        assert_eq!(instance.interaction, Interaction::InstanceOperation);
        assert_eq!(instance.operation_name.as_deref(), Some("everything"));
    }

    #[test]
    fn rejects_cross_tenant_url() {
        let err = parse_interaction(
            "GET",
            "https://other.example.org/demo/Patient",
            "https://fhir.example.org/demo",
            known,
        )
        .unwrap_err();
        assert!(err.reason.contains("authority"));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let err = parse_interaction("GET", "/Unknown/1/2/3/4", "https://x", known).unwrap_err();
        assert_eq!(err.http_method, "GET");
    }

    #[test]
    fn round_trips_through_printer() {
        let cases: Vec<(&str, &str)> = vec![
            ("GET", "/"),
            ("GET", "/metadata"),
            ("GET", "/Patient"),
            ("POST", "/Patient"),
            ("POST", "/Patient?identifier=abc"),
            ("GET", "/Patient/1"),
            ("PUT", "/Patient/1"),
            ("DELETE", "/Patient/1"),
            ("GET", "/Patient/1/_history"),
            ("GET", "/Patient/1/_history/3"),
            ("GET", "/Patient/1/*"),
            ("GET", "/Patient/1/Observation"),
            ("GET", "/Patient/1/$everything"),
        ];
        for (method, url) in cases {
            let parsed = parse_interaction(method, url, "https://x", known).unwrap();
            let (reprinted_method, reprinted_url) = parsed.to_method_and_url();
            let reparsed = parse_interaction(&reprinted_method, &reprinted_url, "https://x", known).unwrap();
            assert_eq!(parsed.interaction, reparsed.interaction, "round trip failed for {method} {url}");
        }
    }
}
