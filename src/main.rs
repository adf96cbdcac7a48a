/// Nodeflow server entry point
///
/// Loads configuration from the environment and starts the HTTP server.

use nodeflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Manual runs and run history at /api/workflows/{id}/run(s) and /api/runs/*
/// - Webhook ingress at /webhook/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and sqlite://nodeflow.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
