use fhirkit_server::{init_tracing, loader, FhirkitServer};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = match loader::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let server = match FhirkitServer::new(&config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to build server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("server error: {err}");
    }
}
