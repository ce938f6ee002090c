//! End-to-end coverage of the FHIR REST surface (spec §6, §8): a real
//! tenant store behind a bound listener, driven with `reqwest`.

use fhirkit_server::config::{AppConfig, ServerSettings, SmartPolicyConfig, TenantConfig};
use serde_json::{json, Value};

async fn spawn_server() -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");

    let config = AppConfig {
        server: ServerSettings::default(),
        tenants: vec![TenantConfig {
            controller_name: "demo".to_string(),
            base_url: format!("http://{addr}/demo"),
            fhir_version: "R4".to_string(),
            bootstrap_dir: None,
            smart_policy: SmartPolicyConfig::Disabled,
            max_resource_count: None,
        }],
    };

    let state = fhirkit_server::AppState::build(&config).expect("build state");
    let router = fhirkit_server::build_router(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });

    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn create_then_read_round_trips_a_resource() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/demo/Patient"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "name": [{"family": "Smith"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let read: Value = client.get(format!("{base}/demo/Patient/{id}")).send().await.unwrap().json().await.unwrap();
    assert_eq!(read["name"][0]["family"], "Smith");
}

#[tokio::test]
async fn update_then_delete_then_read_returns_not_found() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(format!("{base}/demo/Patient"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let updated = client
        .put(format!("{base}/demo/Patient/{id}"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "id": id, "active": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 200);

    let deleted = client.delete(format!("{base}/demo/Patient/{id}")).send().await.unwrap();
    assert_eq!(deleted.status(), 204);

    let after_delete = client.get(format!("{base}/demo/Patient/{id}")).send().await.unwrap();
    assert_eq!(after_delete.status(), 404);
}

#[tokio::test]
async fn conditional_create_returns_existing_resource_when_criteria_already_match() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("{base}/demo/Patient"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "identifier": [{"system": "urn:mrn", "value": "123"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let conditional = client
        .post(format!("{base}/demo/Patient?identifier=urn:mrn|123"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient", "identifier": [{"system": "urn:mrn", "value": "123"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(conditional.status(), 200);
    let body: Value = conditional.json().await.unwrap();
    assert_eq!(body["id"], first["id"]);
}

#[tokio::test]
async fn metadata_lists_known_resource_types() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/demo/Patient"))
        .header("content-type", "application/fhir+json")
        .json(&json!({"resourceType": "Patient"}))
        .send()
        .await
        .unwrap();

    let capability: Value = client.get(format!("{base}/demo/metadata")).send().await.unwrap().json().await.unwrap();
    assert_eq!(capability["resourceType"], "CapabilityStatement");
    let types: Vec<&str> = capability["rest"][0]["resource"].as_array().unwrap().iter().map(|r| r["type"].as_str().unwrap()).collect();
    assert!(types.contains(&"Patient"));
}

#[tokio::test]
async fn unknown_tenant_returns_not_found() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();
    let response = client.get(format!("{base}/not-a-tenant/Patient")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn batch_bundle_creates_each_entry() {
    let (base, _server) = spawn_server().await;
    let client = reqwest::Client::new();

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "POST", "url": "Patient"}, "resource": {"resourceType": "Patient"}},
            {"request": {"method": "POST", "url": "Observation"}, "resource": {"resourceType": "Observation"}},
        ],
    });

    let response: Value = client.post(format!("{base}/demo")).json(&bundle).send().await.unwrap().json().await.unwrap();
    assert_eq!(response["resourceType"], "Bundle");
    assert_eq!(response["entry"].as_array().unwrap().len(), 2);
    for entry in response["entry"].as_array().unwrap() {
        assert_eq!(entry["response"]["status"], "201");
    }
}
