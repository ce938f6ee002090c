//! The `AuthorizationInfo` record and its satellite request/response types
//! (spec §3, §4.8).

use std::collections::HashMap;

use fhirkit_core::time::FhirDateTime;

use crate::scopes::{parse_scope_string, ResourceScope, ScopeContext, ScopeToken};

/// The parameters an authorization request arrived with.
#[derive(Debug, Clone)]
pub struct RequestParameters {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub launch: Option<String>,
    pub scope: String,
    pub state: String,
    pub audience: String,
    pub pkce_challenge: Option<String>,
    pub pkce_method: Option<String>,
}

/// A single `key → AuthorizationInfo` record tracked by the SMART Auth
/// Manager for the lifetime of one authorization flow (spec §4.8).
#[derive(Debug, Clone)]
pub struct AuthorizationInfo {
    pub key: String,
    pub tenant: String,
    pub remote_ip: Option<String>,
    pub request_parameters: RequestParameters,
    pub created: FhirDateTime,
    pub last_accessed: FhirDateTime,
    pub expires: FhirDateTime,
    pub user_id: Option<String>,
    pub launch_patient: Option<String>,
    pub launch_practitioner: Option<String>,
    /// Every requested scope token, toggled by the consent step.
    pub scopes: HashMap<String, bool>,
    /// Granted resource scopes under `patient/*`, context stripped.
    pub patient_scopes: Vec<ResourceScope>,
    /// Granted resource scopes under `user/*`, context stripped.
    pub user_scopes: Vec<ResourceScope>,
    pub auth_code: Option<String>,
    pub response: Option<SmartTokenResponse>,
}

impl AuthorizationInfo {
    pub fn new(key: String, tenant: String, remote_ip: Option<String>, request_parameters: RequestParameters, created: FhirDateTime, expires: FhirDateTime) -> Self {
        let scopes = request_parameters.scope.split_whitespace().map(|s| (s.to_string(), false)).collect();
        Self {
            key,
            tenant,
            remote_ip,
            request_parameters,
            created,
            last_accessed: created,
            expires,
            user_id: None,
            launch_patient: None,
            launch_practitioner: None,
            scopes,
            patient_scopes: Vec::new(),
            user_scopes: Vec::new(),
            auth_code: None,
            response: None,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: &FhirDateTime) -> bool {
        now.inner() >= self.expires.inner()
    }

    /// Grants every scope currently marked `true` in `scopes`, splitting the
    /// granted resource scopes into `patient_scopes`/`user_scopes` (spec
    /// §4.8's "scope map is toggled" consent step).
    pub fn recompute_granted_scopes(&mut self) {
        self.patient_scopes.clear();
        self.user_scopes.clear();
        for (raw, granted) in &self.scopes {
            if !granted {
                continue;
            }
            for token in parse_scope_string(raw) {
                if let ScopeToken::Resource(context, resource_scope) = token {
                    match context {
                        ScopeContext::Patient => self.patient_scopes.push(resource_scope),
                        ScopeContext::User => self.user_scopes.push(resource_scope),
                        ScopeContext::System => {
                            self.patient_scopes.push(resource_scope.clone());
                            self.user_scopes.push(resource_scope);
                        }
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn granted_scope_string(&self) -> String {
        let mut granted: Vec<&str> = self.scopes.iter().filter(|(_, v)| **v).map(|(k, _)| k.as_str()).collect();
        granted.sort_unstable();
        granted.join(" ")
    }
}

/// Issued in response to a successful token exchange or refresh (spec §4.8).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SmartTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
}

/// Returned by introspection (spec §4.8, RFC 7662-shaped but trimmed to the
/// fields the spec names).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhirkit_core::time::now_utc;

    fn sample_params() -> RequestParameters {
        RequestParameters {
            response_type: "code".into(),
            client_id: "app1".into(),
            redirect_uri: "https://app.example.org/callback".into(),
            launch: None,
            scope: "launch openid patient/Observation.rs user/Patient.r".into(),
            state: "xyz".into(),
            audience: "https://fhir.example.org/demo".into(),
            pkce_challenge: Some("challenge".into()),
            pkce_method: Some("S256".into()),
        }
    }

    #[test]
    fn recompute_splits_patient_and_user_scopes() {
        let now = now_utc();
        let mut info = AuthorizationInfo::new("key1".into(), "demo".into(), None, sample_params(), now, now);
        for granted in info.scopes.values_mut() {
            *granted = true;
        }
        info.recompute_granted_scopes();
        assert_eq!(info.patient_scopes.len(), 1);
        assert_eq!(info.user_scopes.len(), 1);
    }

    #[test]
    fn ungranted_scopes_are_excluded() {
        let now = now_utc();
        let info = AuthorizationInfo::new("key1".into(), "demo".into(), None, sample_params(), now, now);
        assert_eq!(info.granted_scope_string(), "");
    }
}
