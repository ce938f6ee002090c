//! `OperationOutcome` construction (spec §6, §7). Every error response and
//! non-trivial success carries one, with `issue[0]` encoding severity, code,
//! and a diagnostic string.

use crate::error::{CoreError, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: &'static str,
    pub diagnostics: String,
}

#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub issues: Vec<OperationOutcomeIssue>,
}

impl OperationOutcome {
    pub fn new(severity: IssueSeverity, code: &'static str, diagnostics: impl Into<String>) -> Self {
        Self {
            issues: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: diagnostics.into(),
            }],
        }
    }

    pub fn information(diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, "informational", diagnostics)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "resourceType": "OperationOutcome",
            "issue": self.issues.iter().map(|issue| json!({
                "severity": match issue.severity {
                    IssueSeverity::Fatal => "fatal",
                    IssueSeverity::Error => "error",
                    IssueSeverity::Warning => "warning",
                    IssueSeverity::Information => "information",
                },
                "code": issue.code,
                "diagnostics": issue.diagnostics,
            })).collect::<Vec<_>>(),
        })
    }
}

/// The FHIR `IssueType` code a [`CoreError`] category maps onto.
fn issue_code(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Invalid => "invalid",
        ErrorCategory::UnsupportedMediaType => "not-supported",
        ErrorCategory::NotFound => "not-found",
        ErrorCategory::Conflict => "conflict",
        ErrorCategory::PreconditionFailed => "conflict",
        ErrorCategory::Unauthorized => "login",
        ErrorCategory::Forbidden => "forbidden",
        ErrorCategory::Internal => "exception",
    }
}

impl From<&CoreError> for OperationOutcome {
    fn from(err: &CoreError) -> Self {
        OperationOutcome::new(IssueSeverity::Error, issue_code(err.category()), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_issue_code() {
        let err = CoreError::not_found("Patient/missing");
        let outcome = OperationOutcome::from(&err);
        assert_eq!(outcome.issues[0].code, "not-found");
        let json = outcome.to_json();
        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["severity"], "error");
    }
}
