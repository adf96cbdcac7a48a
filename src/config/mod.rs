/// Configuration management for the nodeflow engine
///
/// Handles server binding, the storage backend, execution tuning and the
/// credential source. Every value can be overridden with a `NODEFLOW_*`
/// environment variable.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Run execution tuning
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Credential source
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Storage backend for workflows, triggers and runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL (e.g. "sqlite://nodeflow.db"), or "memory" for the
    /// non-persistent in-process store
    pub url: String,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.eq_ignore_ascii_case("memory")
    }
}

/// Execution coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Attempts for the final ledger write of a run
    pub ledger_write_attempts: u32,
    /// Capacity of the execution event channel
    pub event_buffer: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            ledger_write_attempts: env_parse("NODEFLOW_LEDGER_WRITE_ATTEMPTS", 3),
            event_buffer: env_parse("NODEFLOW_EVENT_BUFFER", 1024),
        }
    }
}

/// Where handler credentials come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// JSON file of `{ "<id>": { "<field>": "<secret>" } }`
    pub file: Option<String>,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("NODEFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_parse("NODEFLOW_PORT", 3004),
            },
            database: DatabaseConfig {
                url: std::env::var("NODEFLOW_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://nodeflow.db".to_string()),
            },
            execution: ExecutionConfig::default(),
            credentials: CredentialsConfig {
                file: std::env::var("NODEFLOW_CREDENTIALS_FILE").ok(),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}
