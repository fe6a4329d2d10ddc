//! Pipeline worker binary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vdesc_queue::JobQueues;
use vdesc_services::{GoogleClient, InferenceClient, ServicePool};
use vdesc_store::{StateStore, StoreConfig};
use vdesc_worker::{
    AdapterExecutor, JobExecutor, PipelineServices, StageRunner, WorkerConfig,
};

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

    info!("Starting vdesc-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

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

    let pool = match ServicePool::from_env() {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            error!("Failed to create service pool: {}", e);
            std::process::exit(1);
        }
    };

    let inference = match InferenceClient::new(Duration::from_secs(300)) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create inference client: {}", e);
            std::process::exit(1);
        }
    };

    let google = match GoogleClient::from_env().await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create Google client: {}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let services = Arc::new(PipelineServices {
        config,
        store,
        pool,
        inference,
        google,
        http: reqwest::Client::new(),
        cancel: shutdown_rx,
    });

    let runner = Arc::new(StageRunner::new(
        Arc::clone(&services),
        Arc::new(AdapterExecutor),
    ));

    let executor = Arc::new(JobExecutor::new(services, queues, runner, shutdown_tx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
