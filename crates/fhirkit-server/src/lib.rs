pub mod bootstrap;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod patch;
pub mod server;
pub mod tenant_store;

pub use config::{loader, AppConfig, ConfigError, TenantConfig};
pub use server::{build_router, AppState, FhirkitServer};
pub use tenant_store::{RequestContext, ResponseContext, TenantStore};

/// Initializes a `tracing` subscriber reading `RUST_LOG` (default `info`),
/// matching the teacher's own logging setup but without the OpenTelemetry
/// exporter this crate has no use for.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
