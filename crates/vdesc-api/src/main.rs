//! Intake API server binary.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vdesc_api::{create_router, ApiConfig, AppState};
use vdesc_queue::JobQueues;
use vdesc_store::{StateStore, StoreConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive("vdesc=info".parse().unwrap()))
        .init();

    info!("Starting vdesc-api");

    let config = ApiConfig::from_env();

    let store = match StateStore::connect(StoreConfig::from_env()).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open state store: {}", e);
            std::process::exit(1);
        }
    };

    let queues = match JobQueues::from_env() {
        Ok(queues) => queues,
        Err(e) => {
            error!("Failed to create job queues: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queues.init().await {
        error!("Failed to initialize queues: {}", e);
        std::process::exit(1);
    }

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok();

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, store, queues);
    let router = create_router(state, metrics_handle);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Listening on {}", addr);
    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
