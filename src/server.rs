/// Server setup and initialization
///
/// Wires together all components: storage, handler registry, execution
/// coordinator, trigger manager and HTTP routes.

use crate::{
    api::{create_run_routes, create_webhook_routes, create_workflow_routes, AppState},
    config::Config,
    credentials::{CredentialResolver, StaticCredentials},
    nodes,
    runtime::{
        events::ExecutionEvent, executor::ExecutionCoordinator, ledger::ExecutionLedger,
        registry::HandlerRegistry,
    },
    storage::{MemoryStore, SqliteStore},
    triggers::{manager::TriggerManager, schedule::SystemClock},
    workflow::storage::WorkflowStore,
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::error::RecvError};
use tracing_subscriber::EnvFilter;

/// Build the HTTP router over an already wired state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow management API routes
        .merge(create_workflow_routes())
        // Manual runs and run history
        .merge(create_run_routes())
        // Webhook ingress
        .merge(create_webhook_routes())
        .with_state(state)
}

/// Create the application state with all components initialized
///
/// Opens the configured store, loads credentials, registers the built-in
/// node handlers and starts the trigger manager (which re-arms persisted
/// schedules).
pub async fn create_state(config: &Config) -> Result<AppState> {
    tracing::info!("🏗️ Initializing storage: {}", config.database.url);
    let (store, ledger): (Arc<dyn WorkflowStore>, Arc<dyn ExecutionLedger>) =
        if config.database.is_memory() {
            let memory = Arc::new(MemoryStore::new());
            let store: Arc<dyn WorkflowStore> = memory.clone();
            let ledger: Arc<dyn ExecutionLedger> = memory;
            (store, ledger)
        } else {
            let sqlite = Arc::new(
                SqliteStore::connect(&config.database.url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?,
            );
            let store: Arc<dyn WorkflowStore> = sqlite.clone();
            let ledger: Arc<dyn ExecutionLedger> = sqlite;
            (store, ledger)
        };

    tracing::info!("🔑 Loading credentials");
    let credentials: Arc<dyn CredentialResolver> = match &config.credentials.file {
        Some(path) => Arc::new(StaticCredentials::from_json_file(path)?),
        None => Arc::new(StaticCredentials::new()),
    };

    tracing::info!("📊 Registering built-in node handlers");
    let registry = Arc::new(HandlerRegistry::new());
    nodes::register_builtin(&registry);

    tracing::info!("🚀 Initializing execution coordinator");
    let coordinator = Arc::new(ExecutionCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&ledger),
        registry,
        credentials,
        &config.execution,
    ));
    spawn_event_logger(&coordinator);

    tracing::info!("⏰ Initializing trigger manager");
    let triggers = TriggerManager::new(
        Arc::clone(&store),
        Arc::clone(&coordinator),
        Arc::new(SystemClock),
    );
    triggers
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start trigger manager: {}", e))?;

    Ok(AppState {
        store,
        ledger,
        coordinator,
        triggers,
    })
}

/// Log every execution event at debug level
fn spawn_event_logger(coordinator: &ExecutionCoordinator) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ExecutionEvent::RunFinished { run_id, workflow_id, status }) => {
                    tracing::info!("🏁 Run {} of {} finished: {}", run_id, workflow_id, status);
                }
                Ok(event) => tracing::debug!(?event, "📡 Execution event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("📡 Event logger lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then disarms all schedule timers.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("nodeflow=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting nodeflow server...");

    let state = create_state(&config).await?;
    let triggers = state.triggers.clone();
    let app = build_router(state);
    tracing::info!("✅ Application initialized successfully");

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("🛑 Shutdown signal received");
        })
        .await?;

    triggers.shutdown().await;
    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
