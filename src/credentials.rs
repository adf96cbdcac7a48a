//! Credential resolution
//!
//! Handlers receive secrets through the narrow [`CredentialResolver`]
//! interface; the coordinator only passes the resolver along and never reads
//! secrets itself. Storage and encryption of secrets live outside this crate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Secret fields of one credential (e.g. `token`, `username`, `password`)
pub type SecretMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Resolve a credential id into its secret fields
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> Result<SecretMap, CredentialError>;
}

/// Fixed credential set held in memory
///
/// Loaded once at startup from a JSON file shaped as
/// `{ "<credential id>": { "<field>": "<secret>" } }`.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    secrets: HashMap<String, SecretMap>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential
    pub fn with<I, K, V>(mut self, credential_id: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.secrets.insert(
            credential_id.into(),
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Load credentials from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read credentials file '{}': {}", path.display(), e))?;
        let secrets: HashMap<String, SecretMap> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid credentials file '{}': {}", path.display(), e))?;
        tracing::info!("🔐 Loaded {} credentials from {}", secrets.len(), path.display());
        Ok(Self { secrets })
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve(&self, credential_id: &str) -> Result<SecretMap, CredentialError> {
        self.secrets
            .get(credential_id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(credential_id.to_string()))
    }
}
