//! services/processor/src/bin/processor.rs

use processor_lib::{
    adapters::{self, DbAdapter, InMemoryStore, TracingExporter},
    config::Config,
    engine::{
        DocumentPipeline, GatewaySettings, ProviderGateway, ProviderRateLimiter, RetryPolicy,
        Scheduler, SchedulerSettings,
    },
    error::ProcessorError,
    web::{self, AppState},
};
use session_insight_core::{domain::ProviderId, ports::DocumentStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ProcessorError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting processor...");

    // --- 2. Connect to Storage ---
    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; documents are kept in memory only.");
            Arc::new(InMemoryStore::new())
        }
    };

    // --- 3. Initialize Provider Adapters ---
    let providers = adapters::configured_providers(&config);
    if providers.is_empty() {
        warn!("No analysis provider has an API key; documents will wait in Pending.");
    }
    for provider in &providers {
        info!(provider = %provider.provider_id(), model = provider.model(), "Analysis provider configured");
    }

    let limiter = Arc::new(ProviderRateLimiter::new(
        ProviderId::ALL.map(|id| (id, config.provider(id).min_interval)),
    ));
    let gateway = Arc::new(ProviderGateway::new(
        providers,
        limiter,
        store.clone(),
        GatewaySettings {
            call_timeout: config.provider_timeout,
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                max_delay: config.retry_max_delay,
                jitter: true,
            },
        },
    ));

    // --- 4. Build the Pipeline and Scheduler ---
    let pipeline = Arc::new(DocumentPipeline::new(
        store.clone(),
        gateway.clone(),
        Arc::new(TracingExporter),
        config.completion_threshold,
        config.min_content_length,
    ));
    let scheduler = Arc::new(Scheduler::new(
        pipeline.clone(),
        store.clone(),
        SchedulerSettings {
            interval: config.scheduler_interval,
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            weights: config.priority_weights,
            shutdown_grace: config.shutdown_grace,
        },
    ));

    let cancel = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    // --- 5. Create the Web Router ---
    let app_state = Arc::new(AppState {
        store,
        pipeline,
        gateway,
    });
    let app = web::router(app_state);

    // --- 6. Run the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for the shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
    info!("Processor stopped.");
    Ok(())
}
