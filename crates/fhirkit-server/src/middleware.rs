use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use axum::response::IntoResponse;
use fhirkit_core::adapter::Mime;
use serde_json::{json, Value};
use uuid::Uuid;

/// Ensures each request carries an `X-Request-Id`, generating one if absent,
/// and mirrors it onto the response for correlation.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).unwrap());

    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name.clone(), req_id_value);
    res
}

/// Rejects bodies and Accept headers outside the JSON mime family (spec §6);
/// XML is not a supported wire format here.
pub async fn content_negotiation(req: Request<Body>, next: Next) -> Response {
    let accept_hdr = req.headers().get("accept").and_then(|v| v.to_str().ok());
    let accept_ok = accept_hdr
        .map(|v| v.trim() == "*/*" || v.split(',').any(|part| matches!(Mime::from_content_type(part), Some(Mime::Json))))
        .unwrap_or(true);

    if !accept_ok {
        return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Only application/fhir+json (or application/json) is supported in Accept");
    }

    let method = req.method().clone();
    let needs_body_type = method == axum::http::Method::POST
        || method == axum::http::Method::PUT
        || method == axum::http::Method::PATCH;

    if needs_body_type {
        let content_type = req.headers().get("content-type").and_then(|v| v.to_str().ok());
        let content_ok = content_type.map(|v| matches!(Mime::from_content_type(v), Some(Mime::Json))).unwrap_or(false);
        if !content_ok {
            return error_response(StatusCode::UNSUPPORTED_MEDIA_TYPE, "Content-Type must be application/fhir+json or application/json");
        }
    }

    next.run(req).await
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    let body: Value = json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": "invalid",
            "diagnostics": msg,
        }]
    });
    (status, Json(body)).into_response()
}
