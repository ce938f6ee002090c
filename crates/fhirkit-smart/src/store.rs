//! The SMART Auth Manager (spec §4.8, C8): an in-memory authorization-code
//! and token store driving one tenant's SMART App Launch flow end to end.

use dashmap::DashMap;
use fhirkit_core::interaction::ParsedInteraction;
use fhirkit_core::time::{now_utc, FhirDateTime};
use time::Duration;
use uuid::Uuid;

use crate::authorize::is_authorized;
use crate::error::SmartError;
use crate::pkce;
use crate::types::{AuthorizationInfo, IntrospectionResponse, RequestParameters, SmartTokenResponse};

const AUTH_CODE_TTL: Duration = Duration::minutes(10);
const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Extracts the 36-character key prefix shared by an authorization code and
/// the tokens minted from it (both are shaped `"{key}_{uuid}"`).
fn key_prefix(token: &str) -> Option<&str> {
    let key = token.get(0..36)?;
    if token.as_bytes().get(36) == Some(&b'_') {
        Some(key)
    } else {
        None
    }
}

fn new_compound_token(key: &str) -> String {
    format!("{key}_{}", Uuid::new_v4())
}

/// Tracks every in-flight and completed authorization for one tenant.
#[derive(Debug, Default)]
pub struct SmartAuthManager {
    authorizations: DashMap<String, AuthorizationInfo>,
}

impl SmartAuthManager {
    #[must_use]
    pub fn new() -> Self {
        Self { authorizations: DashMap::new() }
    }

    /// Starts an authorization flow: validates the request's `audience`
    /// against the tenant's base URL (ignoring a trailing slash either
    /// side), registers a fresh [`AuthorizationInfo`], and returns the
    /// redirect to the tenant's login page.
    pub fn request_auth(&self, tenant: &str, tenant_base_url: &str, remote_ip: Option<String>, params: RequestParameters) -> Result<String, SmartError> {
        if params.audience.trim_end_matches('/') != tenant_base_url.trim_end_matches('/') {
            return Err(SmartError::InvalidRequest(format!("audience '{}' does not match tenant base URL", params.audience)));
        }
        if params.response_type != "code" {
            return Err(SmartError::InvalidRequest(format!("unsupported response_type '{}'", params.response_type)));
        }
        let key = Uuid::new_v4().to_string();
        let now = now_utc();
        let expires = FhirDateTime::new(*now.inner() + AUTH_CODE_TTL);
        let info = AuthorizationInfo::new(key.clone(), tenant.to_string(), remote_ip, params, now, expires);
        self.authorizations.insert(key.clone(), info);
        Ok(format!("/smart/login?store={tenant}&key={key}"))
    }

    /// Records the authenticated user and launch context against a pending
    /// authorization (the login step). Returns `false` if the key is
    /// unknown or has expired.
    pub fn try_update_auth(&self, key: &str, user_id: &str, launch_patient: Option<String>, launch_practitioner: Option<String>) -> bool {
        let now = now_utc();
        let Some(mut entry) = self.authorizations.get_mut(key) else {
            return false;
        };
        if entry.is_expired(&now) {
            return false;
        }
        entry.user_id = Some(user_id.to_string());
        entry.launch_patient = launch_patient;
        entry.launch_practitioner = launch_practitioner;
        entry.last_accessed = now;
        true
    }

    /// Records the user's per-scope consent decisions (the consent step),
    /// recomputing `patient_scopes`/`user_scopes` from whichever scopes
    /// were granted.
    pub fn try_update_consent(&self, key: &str, granted_scopes: &[String]) -> bool {
        let now = now_utc();
        let Some(mut entry) = self.authorizations.get_mut(key) else {
            return false;
        };
        if entry.is_expired(&now) {
            return false;
        }
        for (scope, granted) in &mut entry.scopes {
            *granted = granted_scopes.iter().any(|g| g == scope);
        }
        entry.recompute_granted_scopes();
        entry.auth_code = Some(new_compound_token(key));
        entry.last_accessed = now;
        true
    }

    /// Builds the client redirect once consent has been recorded:
    /// `{redirect_uri}?code={authCode}&state={state}`.
    pub fn try_get_client_redirect(&self, key: &str) -> Option<String> {
        let entry = self.authorizations.get(key)?;
        let code = entry.auth_code.as_ref()?;
        Some(format!("{}?code={}&state={}", entry.request_parameters.redirect_uri, code, entry.request_parameters.state))
    }

    /// Exchanges an authorization code for tokens (spec §4.8): validates
    /// tenant, client id, and PKCE verifier, then mints access/refresh
    /// tokens plus a signed `idToken`.
    pub fn try_create_smart_response(&self, tenant: &str, auth_code: &str, client_id: &str, code_verifier: &str) -> Result<SmartTokenResponse, SmartError> {
        let key = key_prefix(auth_code).ok_or_else(|| SmartError::InvalidGrant("malformed authorization code".to_string()))?;
        let now = now_utc();
        let mut entry = self.authorizations.get_mut(key).ok_or_else(|| SmartError::InvalidGrant("unknown authorization code".to_string()))?;

        if entry.is_expired(&now) {
            return Err(SmartError::Expired);
        }
        if entry.auth_code.as_deref() != Some(auth_code) {
            return Err(SmartError::InvalidGrant("authorization code does not match".to_string()));
        }
        if entry.tenant != tenant {
            return Err(SmartError::InvalidGrant("authorization code was not issued for this tenant".to_string()));
        }
        if entry.request_parameters.client_id != client_id {
            return Err(SmartError::InvalidClient("client_id does not match the authorization request".to_string()));
        }

        let challenge = entry.request_parameters.pkce_challenge.clone().ok_or_else(|| SmartError::InvalidRequest("no PKCE challenge on record".to_string()))?;
        let method = entry.request_parameters.pkce_method.clone().unwrap_or_default();
        pkce::verify(&challenge, &method, code_verifier)?;

        let audience = entry.request_parameters.audience.clone();
        let user_id = entry.user_id.clone().unwrap_or_default();
        let patient = entry.launch_patient.clone();
        let scope = entry.granted_scope_string();

        let issued_at = now.timestamp();
        let expires_at = issued_at + ACCESS_TOKEN_TTL_SECS;
        let id_token = jsonwebtoken_id_token(&audience, &user_id, issued_at, expires_at)?;

        let response = SmartTokenResponse {
            access_token: new_compound_token(key),
            token_type: "Bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS as u64,
            scope,
            refresh_token: Some(new_compound_token(key)),
            id_token: Some(id_token),
            patient,
        };

        entry.response = Some(response.clone());
        entry.auth_code = None;
        entry.last_accessed = now;
        entry.expires = FhirDateTime::new(*now.inner() + Duration::seconds(ACCESS_TOKEN_TTL_SECS));
        Ok(response)
    }

    /// Rotates the access and refresh tokens for a still-valid refresh
    /// token, re-signing the `idToken`.
    pub fn refresh(&self, tenant: &str, refresh_token: &str, client_id: &str) -> Result<SmartTokenResponse, SmartError> {
        let key = key_prefix(refresh_token).ok_or(SmartError::InvalidToken)?;
        let now = now_utc();
        let mut entry = self.authorizations.get_mut(key).ok_or(SmartError::InvalidToken)?;

        if entry.tenant != tenant || entry.request_parameters.client_id != client_id {
            return Err(SmartError::InvalidClient("client_id/tenant does not match the original grant".to_string()));
        }
        let current = entry.response.as_ref().ok_or(SmartError::InvalidToken)?;
        if current.refresh_token.as_deref() != Some(refresh_token) {
            return Err(SmartError::InvalidToken);
        }

        let audience = entry.request_parameters.audience.clone();
        let user_id = entry.user_id.clone().unwrap_or_default();
        let patient = entry.launch_patient.clone();
        let scope = current.scope.clone();

        let issued_at = now.timestamp();
        let expires_at = issued_at + ACCESS_TOKEN_TTL_SECS;
        let id_token = jsonwebtoken_id_token(&audience, &user_id, issued_at, expires_at)?;

        let response = SmartTokenResponse {
            access_token: new_compound_token(key),
            token_type: "Bearer".to_string(),
            expires_in: ACCESS_TOKEN_TTL_SECS as u64,
            scope,
            refresh_token: Some(new_compound_token(key)),
            id_token: Some(id_token),
            patient,
        };

        entry.response = Some(response.clone());
        entry.last_accessed = now;
        entry.expires = FhirDateTime::new(*now.inner() + Duration::seconds(ACCESS_TOKEN_TTL_SECS));
        Ok(response)
    }

    /// RFC 7662-shaped introspection, trimmed to the fields the SMART
    /// Auth Manager tracks.
    #[must_use]
    pub fn introspect(&self, access_token: &str) -> IntrospectionResponse {
        let Some(key) = key_prefix(access_token) else {
            return IntrospectionResponse::inactive();
        };
        let now = now_utc();
        let Some(entry) = self.authorizations.get(key) else {
            return IntrospectionResponse::inactive();
        };
        if entry.is_expired(&now) {
            return IntrospectionResponse::inactive();
        }
        let Some(response) = entry.response.as_ref() else {
            return IntrospectionResponse::inactive();
        };
        if response.access_token != access_token {
            return IntrospectionResponse::inactive();
        }
        IntrospectionResponse {
            active: true,
            scope: Some(response.scope.clone()),
            client_id: Some(entry.request_parameters.client_id.clone()),
            username: entry.user_id.clone(),
            sub: entry.user_id.clone(),
            aud: Some(entry.request_parameters.audience.clone()),
        }
    }

    /// Whether `access_token` authorizes `parsed` (spec §4.8's trailing
    /// default branch resolves to `true` once the token itself is valid,
    /// matching [`crate::authorize::is_authorized`]'s contract).
    #[must_use]
    pub fn is_request_authorized(&self, access_token: &str, parsed: &ParsedInteraction) -> bool {
        let Some(key) = key_prefix(access_token) else {
            return false;
        };
        let now = now_utc();
        let Some(entry) = self.authorizations.get(key) else {
            return false;
        };
        if entry.is_expired(&now) {
            return false;
        }
        let Some(response) = entry.response.as_ref() else {
            return false;
        };
        if response.access_token != access_token {
            return false;
        }
        is_authorized(parsed, &entry.patient_scopes, &entry.user_scopes)
    }
}

fn jsonwebtoken_id_token(audience: &str, user_id: &str, issued_at: i64, expires_at: i64) -> Result<String, SmartError> {
    crate::jwt::build_id_token(audience, user_id, issued_at, expires_at).map_err(|e| SmartError::InvalidRequest(format!("failed to sign idToken: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkce::{challenge_from_verifier, generate_verifier};

    fn sample_params(audience: &str, verifier: &str) -> RequestParameters {
        RequestParameters {
            response_type: "code".into(),
            client_id: "app1".into(),
            redirect_uri: "https://app.example.org/callback".into(),
            launch: None,
            scope: "launch openid patient/Observation.rs patient/Patient.r".into(),
            state: "xyz".into(),
            audience: audience.into(),
            pkce_challenge: Some(challenge_from_verifier(verifier)),
            pkce_method: Some("S256".into()),
        }
    }

    fn full_flow(manager: &SmartAuthManager, verifier: &str) -> SmartTokenResponse {
        let redirect = manager.request_auth("demo", "https://fhir.example.org/demo", None, sample_params("https://fhir.example.org/demo", verifier)).unwrap();
        let key = redirect.rsplit("key=").next().unwrap().to_string();
        assert!(manager.try_update_auth(&key, "Practitioner/1", Some("Patient/7".to_string()), None));
        let granted: Vec<String> = vec!["launch".into(), "openid".into(), "patient/Observation.rs".into(), "patient/Patient.r".into()];
        assert!(manager.try_update_consent(&key, &granted));
        let client_redirect = manager.try_get_client_redirect(&key).unwrap();
        let code = client_redirect.split("code=").nth(1).unwrap().split('&').next().unwrap().to_string();
        manager.try_create_smart_response("demo", &code, "app1", verifier).unwrap()
    }

    #[test]
    fn rejects_audience_mismatch() {
        let manager = SmartAuthManager::new();
        let err = manager.request_auth("demo", "https://fhir.example.org/demo", None, sample_params("https://fhir.example.org/other", "v")).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }

    #[test]
    fn accepts_audience_with_trailing_slash_either_side() {
        let manager = SmartAuthManager::new();
        assert!(manager.request_auth("demo", "https://fhir.example.org/demo/", None, sample_params("https://fhir.example.org/demo", "v")).is_ok());
    }

    #[test]
    fn full_code_exchange_issues_tokens_and_id_token() {
        let manager = SmartAuthManager::new();
        let verifier = generate_verifier();
        let response = full_flow(&manager, &verifier);
        assert_eq!(response.token_type, "Bearer");
        assert!(response.id_token.is_some());
        assert_eq!(response.patient.as_deref(), Some("Patient/7"));
    }

    #[test]
    fn wrong_code_verifier_fails() {
        let manager = SmartAuthManager::new();
        let verifier = generate_verifier();
        let redirect = manager.request_auth("demo", "https://fhir.example.org/demo", None, sample_params("https://fhir.example.org/demo", &verifier)).unwrap();
        let key = redirect.rsplit("key=").next().unwrap().to_string();
        manager.try_update_auth(&key, "Practitioner/1", Some("Patient/7".to_string()), None);
        let granted: Vec<String> = vec!["launch".into(), "patient/Observation.rs".into()];
        manager.try_update_consent(&key, &granted);
        let client_redirect = manager.try_get_client_redirect(&key).unwrap();
        let code = client_redirect.split("code=").nth(1).unwrap().split('&').next().unwrap().to_string();
        let err = manager.try_create_smart_response("demo", &code, "app1", "wrong-verifier-wrong-verifier-wrong-verif").unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[test]
    fn refresh_rotates_tokens() {
        let manager = SmartAuthManager::new();
        let verifier = generate_verifier();
        let first = full_flow(&manager, &verifier);
        let refreshed = manager.refresh("demo", &first.refresh_token.unwrap(), "app1").unwrap();
        assert_ne!(first.access_token, refreshed.access_token);
    }

    #[test]
    fn introspect_reports_active_then_inactive_after_bad_token() {
        let manager = SmartAuthManager::new();
        let verifier = generate_verifier();
        let response = full_flow(&manager, &verifier);
        let active = manager.introspect(&response.access_token);
        assert!(active.active);
        let inactive = manager.introspect("not-a-real-token-not-a-real-token-00_nope");
        assert!(!inactive.active);
    }

    #[test]
    fn unmatched_scope_still_authorizes_per_default_open_policy() {
        let manager = SmartAuthManager::new();
        let verifier = generate_verifier();
        let response = full_flow(&manager, &verifier);
        let parsed = fhirkit_core::interaction::parse_interaction("GET", "https://fhir.example.org/demo/Encounter/1", "https://fhir.example.org/demo", |rt| rt == "Encounter").unwrap();
        assert!(manager.is_request_authorized(&response.access_token, &parsed));
    }
}
