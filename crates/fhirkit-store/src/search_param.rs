//! Executable search-parameter definitions (spec §4.3, §4.4). The Resource
//! Store owns the registry of *executable* parameters — those with a
//! compiled path expression the Search Engine (C4) can evaluate — because
//! changing it invalidates the enclosing Tenant Store's capability
//! statement cache (spec §4.7).

use serde::{Deserialize, Serialize};

/// FHIR search-parameter type, fixing the decoding/comparison rules the
/// Search Engine applies (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchParamType {
    Number,
    Date,
    String,
    Token,
    Reference,
    Quantity,
    Uri,
    Composite,
    Special,
}

/// A single named, executable search parameter bound to one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParamDefinition {
    pub name: String,
    pub base_resource_type: String,
    pub param_type: SearchParamType,
    /// FHIRPath-subset expression evaluated through the Version Adapter's
    /// `EvaluatePath` (may contain `|`-separated polymorphic alternatives).
    pub expression: String,
    /// For `reference`/`composite` parameters: the resource types a match
    /// is allowed to target. Empty means unrestricted.
    pub target_types: Vec<String>,
}

impl SearchParamDefinition {
    pub fn new(
        name: impl Into<String>,
        base_resource_type: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_resource_type: base_resource_type.into(),
            param_type,
            expression: expression.into(),
            target_types: Vec::new(),
        }
    }

    pub fn with_target_types(mut self, target_types: Vec<String>) -> Self {
        self.target_types = target_types;
        self
    }
}
