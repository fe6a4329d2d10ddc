//! One-shot pipeline CLI: process a single video without the queues.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vdesc_models::{JobKey, JobRecord, Subscriber, TrimWindow};
use vdesc_services::{GoogleClient, InferenceClient, ServicePool};
use vdesc_store::{StateStore, StoreConfig};
use vdesc_worker::{AdapterExecutor, PipelineServices, StageRunner, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "run-pipeline", about = "Run the description pipeline for one video")]
struct Args {
    /// YouTube video id to process
    #[arg(long)]
    video_id: String,

    /// Trim window start, in seconds
    #[arg(long)]
    start_time: Option<u32>,

    /// Trim window end, in seconds
    #[arg(long)]
    end_time: Option<u32>,

    /// Post the finished artifact to the destination server
    #[arg(long)]
    upload_to_server: bool,

    /// AI user the description is produced for
    #[arg(long, env = "YDX_AI_USER_ID", default_value = "ai-default")]
    ai_user_id: String,
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("vdesc=info".parse().unwrap()))
        .init();

    let args = Args::parse();

    let trim = match (args.start_time, args.end_time) {
        (Some(start), Some(end)) if end > start => Some(TrimWindow {
            start_secs: start,
            end_secs: end,
        }),
        (Some(_), Some(_)) => {
            error!("end_time must be greater than start_time");
            std::process::exit(2);
        }
        (None, None) => None,
        _ => {
            error!("start_time and end_time must be provided together");
            std::process::exit(2);
        }
    };

    let mut config = WorkerConfig::from_env();
    config.upload_enabled = args.upload_to_server;

    let store = match StateStore::connect(StoreConfig::from_env()).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open state store: {}", e);
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
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        let _ = shutdown_tx.send(true);
    });

    let services = Arc::new(PipelineServices {
        config,
        store: store.clone(),
        pool: Arc::new(ServicePool::from_env().expect("service pool")),
        inference: Arc::new(InferenceClient::new(Duration::from_secs(300)).expect("inference client")),
        google,
        http: reqwest::Client::new(),
        cancel: shutdown_rx,
    });

    let key = JobKey::new(args.video_id, args.ai_user_id);
    let record = JobRecord::new(key.clone(), trim);
    if let Err(e) = store.upsert_job(&record).await {
        error!("Failed to create job row: {}", e);
        std::process::exit(1);
    }

    // The CLI registers the env-configured destination as the single
    // subscriber when uploading is requested.
    if args.upload_to_server {
        let subscriber = Subscriber {
            user_id: std::env::var("YDX_USER_ID").unwrap_or_default(),
            ydx_server: std::env::var("YDX_WEB_SERVER").unwrap_or_default(),
            ydx_app_host: std::env::var("YDX_APP_HOST").unwrap_or_default(),
        };
        if subscriber.ydx_server.is_empty() {
            error!("--upload_to_server requires YDX_WEB_SERVER");
            std::process::exit(2);
        }
        if let Err(e) = store.add_subscriber(&key, &subscriber).await {
            error!("Failed to add subscriber: {}", e);
            std::process::exit(1);
        }
    }

    let runner = StageRunner::new(services, Arc::new(AdapterExecutor));
    match runner.run_job(&key).await {
        Ok(()) => info!(key = %key, "Pipeline complete"),
        Err(e) => {
            error!("Pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}
