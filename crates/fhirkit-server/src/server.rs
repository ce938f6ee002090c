//! Builds the axum [`Router`] and owns the per-tenant state every handler
//! reads from (spec §6). One process serves every configured tenant,
//! distinguished by the `controller_name` path segment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{any, get, post};
use axum::Router;
use fhirkit_notifications::run_heartbeat_scheduler;
use fhirkit_smart::store::SmartAuthManager;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bootstrap::build_tenant_stores;
use crate::config::{AppConfig, ConfigError};
use crate::handlers;
use crate::middleware::{content_negotiation, request_id};
use crate::tenant_store::TenantStore;

/// Shared, cheaply-clonable state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub tenants: Arc<HashMap<String, Arc<TenantStore>>>,
    pub smart: Arc<HashMap<String, Arc<SmartAuthManager>>>,
}

impl AppState {
    pub fn build(config: &AppConfig) -> Result<Self, ConfigError> {
        let stores = build_tenant_stores(config.tenants.clone())?;
        let mut tenants = HashMap::with_capacity(stores.len());
        let mut smart = HashMap::with_capacity(stores.len());
        for store in stores {
            let name = store.tenant.controller_name.clone();
            if store.tenant.smart_enabled() {
                smart.insert(name.clone(), Arc::new(SmartAuthManager::new()));
            }
            tokio::spawn(run_heartbeat_scheduler(store.subscriptions().clone(), store.dispatcher().clone()));
            tenants.insert(name, store);
        }
        Ok(Self { tenants: Arc::new(tenants), smart: Arc::new(smart) })
    }
}

/// Builds the full route table (spec §6): health checks, SMART well-known
/// and OAuth-shaped endpoints, and the catch-all FHIR REST surface.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    // Only the FHIR REST surface enforces the Accept/Content-Type family
    // (spec §6); the SMART endpoints below speak form-urlencoded, per RFC 6749.
    let fhir_routes = Router::new()
        .route("/{tenant}", any(handlers::fhir_dispatch))
        .route("/{tenant}/", any(handlers::fhir_dispatch))
        .route("/{tenant}/{*rest}", any(handlers::fhir_dispatch))
        .route_layer(axum::middleware::from_fn(content_negotiation));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/smart/login", post(handlers::smart_login))
        .route("/{tenant}/.well-known/smart-configuration", get(handlers::smart_configuration))
        .route("/_smart/{tenant}/authorize", get(handlers::smart_authorize))
        .route("/_smart/{tenant}/token", post(handlers::smart_token))
        .route("/_smart/{tenant}/introspect", post(handlers::smart_introspect))
        .merge(fhir_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(request_id))
                .layer(cors)
                .layer(tower::timeout::TimeoutLayer::new(Duration::from_secs(30))),
        )
        .with_state(state)
}

/// Binds and serves `build_router`'s output until shutdown (spec §5's
/// "parallel threads with cooperative I/O" scheduling model, realized here
/// as a tokio multi-threaded runtime via `#[tokio::main]` in `main.rs`).
pub struct FhirkitServer {
    addr: SocketAddr,
    router: Router,
}

impl FhirkitServer {
    pub fn new(config: &AppConfig) -> Result<Self, ConfigError> {
        let state = AppState::build(config)?;
        Ok(Self { addr: config.addr(), router: build_router(state) })
    }

    pub async fn run(self) -> std::io::Result<()> {
        info!(addr = %self.addr, "starting fhirkit-server");
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.router).with_graceful_shutdown(shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
