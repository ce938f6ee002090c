//! Axum handlers: the HTTP surface described by spec §6. Each FHIR request
//! is routed to the owning tenant, parsed into an [`Interaction`] by the
//! Tenant Store, checked against SMART authorization if the tenant requires
//! it, and rendered back from the returned `ResponseContext`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use fhirkit_core::outcome::{IssueSeverity, OperationOutcome};
use fhirkit_smart::authorize::always_allowed;
use fhirkit_smart::types::RequestParameters;

use crate::server::AppState;
use crate::tenant_store::RequestContext;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "fhirkit-server",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn readyz() -> impl IntoResponse {
    Json(json!({"status": "ready"}))
}

/// Catch-all FHIR REST entry point for every route under `/{tenant}/...`
/// (spec §6's routing table). The exact interaction shape is resolved by
/// the tenant's own parser rather than by axum's router, since the parser
/// already encodes the full method × segment-count × query dispatch.
pub async fn fhir_dispatch(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let path = uri.path();
    let query = uri.query().unwrap_or("");
    let mut segments = path.trim_start_matches('/').splitn(2, '/');
    let tenant_name = segments.next().unwrap_or("");
    let rest = segments.next().unwrap_or("");

    let Some(store) = state.tenants.get(tenant_name) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("unknown tenant '{tenant_name}'"));
    };

    let rel_url = if query.is_empty() { rest.to_string() } else { format!("{rest}?{query}") };
    let parsed = match store.parse_request(method.as_str(), &rel_url) {
        Ok(parsed) => parsed,
        Err(e) => return outcome_response(StatusCode::BAD_REQUEST, e.reason),
    };

    if store.tenant.smart_required() && !always_allowed(parsed.interaction) {
        let authorized = bearer_token(&headers)
            .map(|token| state.smart.get(tenant_name).map(|m| m.is_request_authorized(token, &parsed)).unwrap_or(false))
            .unwrap_or(false);
        if !authorized {
            return outcome_response(StatusCode::UNAUTHORIZED, "a valid bearer token is required for this tenant".to_string());
        }
    }

    let body_value: Option<Value> = if body.is_empty() { None } else { serde_json::from_slice(&body).ok() };

    let ctx = RequestContext {
        parsed,
        body: body_value,
        if_match: header_str(&headers, header::IF_MATCH),
        if_none_match: header_str(&headers, header::IF_NONE_MATCH),
        if_none_exist: header_str(&headers, "if-none-exist"),
    };

    let response = store.handle(ctx);
    let mut builder = Response::builder().status(response.status);
    if let Some(etag) = response.etag.as_deref() {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(last_modified) = response.last_modified.as_deref() {
        builder = builder.header(header::LAST_MODIFIED, last_modified);
    }
    if let Some(location) = response.location.as_deref() {
        builder = builder.header(header::LOCATION, location);
    }
    builder = builder.header(header::CONTENT_TYPE, "application/fhir+json");
    let payload = if response.body.is_null() { Bytes::new() } else { Bytes::from(serde_json::to_vec(&response.body).unwrap_or_default()) };
    builder.body(axum::body::Body::from(payload)).unwrap()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn header_str(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

fn outcome_response(status: StatusCode, diagnostics: String) -> Response {
    let outcome = OperationOutcome::new(IssueSeverity::Error, "invalid", diagnostics);
    (status, Json(outcome.to_json())).into_response()
}

// ---- SMART well-known and OAuth-shaped endpoints (spec §4.8, §6) ----

pub async fn smart_configuration(axum::extract::Path(tenant): axum::extract::Path<String>, State(state): State<AppState>) -> Response {
    let Some(store) = state.tenants.get(&tenant) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("unknown tenant '{tenant}'"));
    };
    let base = store.tenant.normalized_base_url();
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("/_smart/{tenant}/authorize"),
        "token_endpoint": format!("/_smart/{tenant}/token"),
        "introspection_endpoint": format!("/_smart/{tenant}/introspect"),
        "capabilities": ["launch-standalone", "client-public", "client-confidential-symmetric", "sso-openid-connect"],
        "response_types_supported": ["code"],
        "code_challenge_methods_supported": ["S256"],
    }))
    .into_response()
}

#[derive(serde::Deserialize)]
pub struct AuthorizeParams {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub launch: Option<String>,
    pub scope: String,
    pub state: String,
    pub aud: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub async fn smart_authorize(
    axum::extract::Path(tenant): axum::extract::Path<String>,
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<AuthorizeParams>,
) -> Response {
    let Some(store) = state.tenants.get(&tenant) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("unknown tenant '{tenant}'"));
    };
    let Some(manager) = state.smart.get(&tenant) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("SMART is disabled for tenant '{tenant}'"));
    };
    let request_parameters = RequestParameters {
        response_type: params.response_type,
        client_id: params.client_id,
        redirect_uri: params.redirect_uri,
        launch: params.launch,
        scope: params.scope,
        state: params.state,
        audience: params.aud,
        pkce_challenge: params.code_challenge,
        pkce_method: params.code_challenge_method,
    };
    match manager.request_auth(&tenant, store.tenant.normalized_base_url(), None, request_parameters) {
        Ok(redirect) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, HeaderValue::from_str(&redirect).unwrap());
            response
        }
        Err(e) => {
            let code = e.oauth_error_code();
            (StatusCode::BAD_REQUEST, Json(json!({"error": code, "error_description": e.to_string()}))).into_response()
        }
    }
}

/// Simulates the external login/consent step named but not specified by
/// spec §4.8 (`Login (external)`): authenticates `user_id` against nothing
/// (this server carries no identity provider of its own) and immediately
/// grants every requested scope, in one round trip.
#[derive(serde::Deserialize)]
pub struct LoginRequest {
    pub store: String,
    pub key: String,
    pub user_id: String,
    pub launch_patient: Option<String>,
    pub launch_practitioner: Option<String>,
    pub granted_scopes: Vec<String>,
}

pub async fn smart_login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    let Some(manager) = state.smart.get(&req.store) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("unknown tenant '{}'", req.store));
    };
    if !manager.try_update_auth(&req.key, &req.user_id, req.launch_patient, req.launch_practitioner) {
        return outcome_response(StatusCode::BAD_REQUEST, "unknown or expired authorization key".to_string());
    }
    if !manager.try_update_consent(&req.key, &req.granted_scopes) {
        return outcome_response(StatusCode::BAD_REQUEST, "unknown or expired authorization key".to_string());
    }
    let Some(redirect) = manager.try_get_client_redirect(&req.key) else {
        return outcome_response(StatusCode::INTERNAL_SERVER_ERROR, "consent recorded but no redirect available".to_string());
    };
    let mut response = StatusCode::FOUND.into_response();
    response.headers_mut().insert(header::LOCATION, HeaderValue::from_str(&redirect).unwrap());
    response
}

#[derive(serde::Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: String,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

pub async fn smart_token(axum::extract::Path(tenant): axum::extract::Path<String>, State(state): State<AppState>, axum::extract::Form(req): axum::extract::Form<TokenRequest>) -> Response {
    let Some(manager) = state.smart.get(&tenant) else {
        return outcome_response(StatusCode::NOT_FOUND, format!("SMART is disabled for tenant '{tenant}'"));
    };
    let result = match req.grant_type.as_str() {
        "authorization_code" => {
            let (Some(code), Some(verifier)) = (req.code, req.code_verifier) else {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request", "error_description": "code and code_verifier are required"}))).into_response();
            };
            manager.try_create_smart_response(&tenant, &code, &req.client_id, &verifier)
        }
        "refresh_token" => {
            let Some(refresh_token) = req.refresh_token else {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_request", "error_description": "refresh_token is required"}))).into_response();
            };
            manager.refresh(&tenant, &refresh_token, &req.client_id)
        }
        other => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "unsupported_grant_type", "error_description": format!("'{other}' is not supported")}))).into_response();
        }
    };
    match result {
        Ok(token_response) => Json(token_response).into_response(),
        Err(e) => {
            let status = match e.oauth_error_code() {
                "invalid_client" => StatusCode::UNAUTHORIZED,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(json!({"error": e.oauth_error_code(), "error_description": e.to_string()}))).into_response()
        }
    }
}

#[derive(serde::Deserialize)]
pub struct IntrospectRequest {
    pub token: String,
}

pub async fn smart_introspect(axum::extract::Path(tenant): axum::extract::Path<String>, State(state): State<AppState>, axum::extract::Form(req): axum::extract::Form<IntrospectRequest>) -> Response {
    let Some(manager) = state.smart.get(&tenant) else {
        return Json(json!({"active": false})).into_response();
    };
    Json(manager.introspect(&req.token)).into_response()
}
