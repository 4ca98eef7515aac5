//! fpl-sync - Resilient synchronization of Fantasy Premier League data
//!
//! This is the main entry point for the fpl-sync application.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use fpl_sync::cache::{CacheBackend, CacheStore, MemoryCache};
use fpl_sync::client::ResilientClient;
use fpl_sync::config::Config;
use fpl_sync::database::{Database, SqliteDatabase};
use fpl_sync::domain::{CurrentEventService, EntrySyncer};
use fpl_sync::models::{EntityId, JobSource};
use fpl_sync::otel::{init_tracing, Metrics, OtelProvider};
use fpl_sync::sync::{drain, InlineQueue, SyncJob, SyncOrchestrator, SyncQueue, SyncScheduler, SyncWorker};

/// fpl-sync - Resilient synchronization of Fantasy Premier League data
#[derive(Parser, Debug)]
#[command(name = "fpl-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "FPL_SYNC_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync worker and scheduler until Ctrl+C or SIGTERM
    Run,
    /// Run one sync job, drain its retries, and print the final outcome
    Sync {
        /// Entry ids to sync; all known entries when omitted
        ids: Vec<EntityId>,

        /// Job source recorded in the sync history
        #[arg(long, default_value = "manual")]
        source: JobSource,
    },
}

/// Shared components built from configuration
struct App {
    config: Config,
    database: Arc<SqliteDatabase>,
    metrics: Arc<Metrics>,
    syncer: Arc<EntrySyncer>,
    events: Arc<CurrentEventService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fpl-sync");

    let metrics = Arc::new(Metrics::new(&otel_provider.meter()));
    let app = build_app(config, metrics).await?;

    let result = match args.command {
        Command::Run => run(app).await,
        Command::Sync { ids, source } => sync_once(app, ids, source).await,
    };

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("fpl-sync shutdown complete");
    result
}

async fn build_app(config: Config, metrics: Arc<Metrics>) -> anyhow::Result<App> {
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let client = Arc::new(
        ResilientClient::new(&config.upstream, &config.http)?.with_recorder(metrics.clone()),
    );
    info!(
        base_url = %client.base_url(),
        capacity = config.http.rate_limit.capacity,
        max_attempts = config.http.retry.max_attempts,
        "Upstream client initialized"
    );

    let backend: Arc<dyn CacheBackend> = Arc::new(MemoryCache::new());
    let entry_cache = Arc::new(
        CacheStore::new(
            backend.clone(),
            "entry",
            Some(Duration::from_secs(config.cache.ttl_secs)),
        )
        .with_metrics(metrics.clone()),
    );
    let event_cache = CacheStore::new(
        backend,
        "event",
        Some(Duration::from_secs(config.cache.event_ttl_secs)),
    )
    .with_metrics(metrics.clone());

    let db: Arc<dyn Database> = database.clone();
    let syncer = Arc::new(EntrySyncer::new(
        client.clone(),
        db.clone(),
        entry_cache,
        config.cache.prefix.clone(),
    ));
    let events = Arc::new(CurrentEventService::new(
        client,
        db,
        event_cache,
        config.cache.prefix.clone(),
    ));
    info!(season = %events.season(), "Domain services initialized");

    Ok(App {
        config,
        database,
        metrics,
        syncer,
        events,
    })
}

/// Daemon mode: worker plus optional scheduler
async fn run(app: App) -> anyhow::Result<()> {
    match app.syncer.warm_up().await {
        Ok(count) => info!(count, "Entry cache ready"),
        Err(e) => warn!(error = %e, "Entry cache warm-up failed"),
    }

    let (queue, rx) = SyncQueue::channel(app.config.sync.queue_capacity);
    let orchestrator = Arc::new(
        SyncOrchestrator::new(
            app.syncer.clone(),
            app.syncer.clone(),
            Arc::new(queue.clone()),
            &app.config.sync,
        )
        .with_history(app.database.clone())
        .with_metrics(app.metrics.clone()),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = vec![tokio::spawn({
        let worker = SyncWorker::new(orchestrator, rx, shutdown_tx.subscribe());
        async move {
            worker.run().await;
        }
    })];

    if app.config.sync.schedule.enabled {
        let scheduler = SyncScheduler::new(
            app.config.sync.schedule.clone(),
            queue.clone(),
            shutdown_tx.subscribe(),
        )
        .with_event_source(app.events.clone());
        handles.push(tokio::spawn(scheduler.run()));
        info!(
            interval_secs = app.config.sync.schedule.interval_secs,
            "Sync scheduler enabled"
        );
    }

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task failed");
        }
    }

    Ok(())
}

/// One-shot mode: one job, retries drained inline
async fn sync_once(app: App, ids: Vec<EntityId>, source: JobSource) -> anyhow::Result<()> {
    let event_context = match app.events.current_event().await {
        Ok(event) => event.map(|e| e.event_id),
        Err(e) => {
            warn!(error = %e, "Could not resolve current gameweek");
            None
        }
    };

    let queue = Arc::new(InlineQueue::new());
    let orchestrator = SyncOrchestrator::new(
        app.syncer.clone(),
        app.syncer.clone(),
        queue.clone(),
        &app.config.sync,
    )
    .with_history(app.database.clone())
    .with_metrics(app.metrics.clone());

    let entity_ids = if ids.is_empty() { None } else { Some(ids) };
    let job = SyncJob::new(entity_ids, source).with_event_context(event_context);

    let outcomes = drain(&orchestrator, &queue, job).await;
    info!(generations = outcomes.len(), "Sync finished");

    if let Some(outcome) = outcomes.last() {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    }

    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
