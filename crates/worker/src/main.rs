//! Standalone worker: runs the dispatch and poll loops against the
//! shared database. The HTTP process stays responsive because every
//! provider round-trip happens here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkstone_events::{EventBus, SubscribeMessageSender};
use inkstone_pipeline::print::PrintGateway;
use inkstone_pipeline::{
    dispatcher, poller, MediaStore, OrderCoordinator, PipelineConfig, PipelineContext,
};
use inkstone_providers::AdapterRegistry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkstone_worker=debug,inkstone_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = PipelineConfig::from_env();
    tracing::info!(
        claim_lease_secs = config.claim_lease_secs,
        dispatch_max_retries = config.dispatch_max_retries,
        "Loaded pipeline configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = inkstone_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    inkstone_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    // Migrations are applied by the API process on boot; the worker
    // only requires the schema to exist.

    // --- Shared services ---
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .expect("Failed to build HTTP client");

    let registry = Arc::new(AdapterRegistry::new(http_client.clone()));

    let store = Arc::new(MediaStore::new(
        http_client.clone(),
        config.output_dir.clone(),
        config.watermark_path.clone(),
        config.watermark_opacity,
        config.public_base_url.clone(),
    ));

    let print_gateway = PrintGateway::new(
        http_client,
        config.print_submit_url.clone(),
        config.print_api_key.clone(),
        config.print_callback_url.clone(),
    );

    let notifier = if config.notify_app_id.is_empty() {
        None
    } else {
        Some(SubscribeMessageSender::new(
            config.notify_api_base.clone(),
            config.notify_app_id.clone(),
            config.notify_app_secret.clone(),
        ))
    };

    let bus = Arc::new(EventBus::default());

    let coordinator = Arc::new(OrderCoordinator::new(
        pool.clone(),
        Arc::clone(&bus),
        Arc::clone(&store),
        print_gateway,
        notifier,
        config.clone(),
    ));

    let ctx = PipelineContext {
        pool,
        registry,
        store,
        coordinator,
        bus,
        config: Arc::new(config),
    };

    // --- Loops ---
    let cancel = CancellationToken::new();

    let dispatch_handle = tokio::spawn(dispatcher::run(ctx.clone(), cancel.clone()));
    let poll_handle = tokio::spawn(poller::run(ctx.clone(), cancel.clone()));
    tracing::info!("Worker loops started (dispatcher, poller)");

    shutdown_signal().await;
    cancel.cancel();

    let _ = tokio::time::timeout(Duration::from_secs(10), dispatch_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(10), poll_handle).await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
