//! Tenant configuration (spec §3).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// The FHIR release a tenant is bound to. The concrete resource-class
/// hierarchy for each version lives behind [`crate::adapter::VersionAdapter`]
/// — this type is just the tenant-facing label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FhirVersion {
    R4,
    R4B,
    R5,
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::R4 => "R4",
            Self::R4B => "R4B",
            Self::R5 => "R5",
        };
        write!(f, "{s}")
    }
}

impl FromStr for FhirVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R4" | "4.0.1" => Ok(Self::R4),
            "R4B" | "4.3.0" => Ok(Self::R4B),
            "R5" | "5.0.0" => Ok(Self::R5),
            other => Err(CoreError::parse(format!("unknown FHIR version: {other}"))),
        }
    }
}

/// Whether SMART authorization is required, allowed, or unavailable for a
/// tenant. `Required` rejects unauthenticated writes and reads alike;
/// `Allowed` accepts both authenticated and anonymous requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SmartPolicy {
    Required,
    #[default]
    Allowed,
    Disabled,
}

/// Per-tenant configuration. One [`Tenant`] maps to one isolated FHIR server
/// instance identified by `controller_name` in the URL (`/{controller_name}/...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub controller_name: String,
    pub fhir_version: FhirVersion,
    pub base_url: String,
    pub supported_formats: Vec<String>,
    pub bootstrap_dir: Option<String>,
    pub smart_policy: SmartPolicy,
    pub max_resource_count: Option<usize>,
}

impl Tenant {
    pub fn new(controller_name: impl Into<String>, base_url: impl Into<String>, fhir_version: FhirVersion) -> Self {
        Self {
            controller_name: controller_name.into(),
            fhir_version,
            base_url: base_url.into(),
            supported_formats: vec![
                "application/fhir+json".to_string(),
                "application/fhir+xml".to_string(),
            ],
            bootstrap_dir: None,
            smart_policy: SmartPolicy::default(),
            max_resource_count: None,
        }
    }

    /// Returns the base URL with any trailing slash trimmed, for prefix
    /// comparisons against incoming request URLs.
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn smart_required(&self) -> bool {
        matches!(self.smart_policy, SmartPolicy::Required)
    }

    pub fn smart_enabled(&self) -> bool {
        !matches!(self.smart_policy, SmartPolicy::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_versions() {
        assert_eq!("R4".parse::<FhirVersion>().unwrap(), FhirVersion::R4);
        assert_eq!("4.3.0".parse::<FhirVersion>().unwrap(), FhirVersion::R4B);
        assert!("R6".parse::<FhirVersion>().is_err());
    }

    #[test]
    fn normalizes_trailing_slash() {
        let t = Tenant::new("demo", "https://fhir.example.org/demo/", FhirVersion::R4);
        assert_eq!(t.normalized_base_url(), "https://fhir.example.org/demo");
    }

    #[test]
    fn smart_policy_defaults_to_allowed() {
        let t = Tenant::new("demo", "https://fhir.example.org/demo", FhirVersion::R4);
        assert!(t.smart_enabled());
        assert!(!t.smart_required());
    }
}
