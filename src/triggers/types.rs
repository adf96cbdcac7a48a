//! Trigger registrations and their errors

use crate::workflow::storage::StoreError;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Method value that accepts every HTTP method
pub const ANY_METHOD: &str = "ANY";

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("webhook path '{path}' is already owned by workflow '{owner}'")]
    Conflict { path: String, owner: String },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("invalid webhook path '{0}'")]
    InvalidPath(String),

    #[error("invalid webhook method '{0}'")]
    InvalidMethod(String),

    #[error("trigger node '{node_id}' is misconfigured: {reason}")]
    InvalidTriggerNode { node_id: String, reason: String },

    #[error("cron expression '{0}' has no upcoming occurrence")]
    NoUpcoming(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How an inbound webhook request must authenticate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WebhookAuth {
    #[default]
    None,
    /// A header that must carry an exact value
    Header { name: String, value: String },
    /// HTTP Basic credentials
    Basic { username: String, password: String },
}

impl WebhookAuth {
    /// Check request headers (keys lowercased) against this auth mode
    pub fn verify(&self, headers: &HashMap<String, String>) -> bool {
        match self {
            WebhookAuth::None => true,
            WebhookAuth::Header { name, value } => headers
                .get(&name.to_ascii_lowercase())
                .is_some_and(|v| v == value),
            WebhookAuth::Basic { username, password } => {
                let Some(encoded) = headers
                    .get("authorization")
                    .and_then(|v| v.strip_prefix("Basic "))
                else {
                    return false;
                };
                let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
                    return false;
                };
                let expected = format!("{}:{}", username, password);
                decoded == expected.as_bytes()
            }
        }
    }
}

/// Webhook registration: one path, one owning workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub workflow_id: String,
    /// Normalized path, see [`normalize_path`]
    pub path: String,
    /// Uppercase method, or [`ANY_METHOD`]
    pub method: String,
    #[serde(default)]
    pub auth: WebhookAuth,
    pub active: bool,
}

impl WebhookTrigger {
    pub fn accepts_method(&self, method: &str) -> bool {
        self.method == ANY_METHOD || self.method.eq_ignore_ascii_case(method)
    }
}

/// Cron registration; at most one active per workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    pub workflow_id: String,
    pub cron: String,
    /// IANA timezone name
    pub timezone: String,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Normalize a webhook path to one leading `/` and no trailing `/`
///
/// Empty paths, `..` segments and whitespace are rejected.
pub fn normalize_path(raw: &str) -> Result<String, TriggerError> {
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    let invalid = segments.is_empty()
        || segments
            .iter()
            .any(|s| *s == "." || *s == ".." || s.chars().any(char::is_whitespace));
    if invalid {
        return Err(TriggerError::InvalidPath(raw.to_string()));
    }
    Ok(format!("/{}", segments.join("/")))
}
