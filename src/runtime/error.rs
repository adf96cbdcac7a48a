//! Error taxonomy of the execution runtime.
//!
//! Graph problems are caught before any node runs. Node problems are
//! recorded on the per-node state and either retried, swallowed by
//! continue-on-fail, or escalated to abort the run. Ledger problems are
//! logged and never abort a run.

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::workflow::storage::StoreError;

/// Structural problems that make a graph unexecutable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Two nodes share an id.
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    /// An edge points at a node that does not exist in the graph.
    #[error("edge '{edge_id}' references unknown node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    /// An edge uses a port the node does not declare.
    #[error("edge '{edge_id}' uses undeclared port '{port}' on node '{node_id}'")]
    UnknownPort {
        edge_id: String,
        node_id: String,
        port: String,
    },

    /// The dependency walk met a node that was still being visited.
    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),

    /// No node is free of incoming edges.
    #[error("graph has no start node")]
    NoStartNode,
}

/// Errors a node handler reports back to the coordinator
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A parameter the handler cannot work without is absent.
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),

    /// A parameter is present but unusable.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The credential resolver could not produce a secret.
    #[error("credential lookup failed: {0}")]
    Credential(#[from] CredentialError),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single node within a run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// No handler is registered under the node's type.
    #[error("no handler registered for node type '{0}'")]
    HandlerNotFound(String),

    /// The node lacks parameters its handler requires.
    #[error("node '{node_id}' is not configured: {reason}")]
    NotConfigured { node_id: String, reason: String },

    /// The handler was invoked and returned an error.
    #[error("node '{node_id}' failed: {message}")]
    Execution { node_id: String, message: String },
}

impl NodeError {
    /// Wrap a handler error raised while executing `node_id`
    pub fn from_handler(node_id: &str, err: HandlerError) -> Self {
        match err {
            HandlerError::MissingParameter(_) | HandlerError::InvalidParameter { .. } => {
                Self::NotConfigured {
                    node_id: node_id.to_string(),
                    reason: err.to_string(),
                }
            }
            other => Self::Execution {
                node_id: node_id.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Only handler execution failures are eligible for retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

/// Errors returned by `ExecutionCoordinator::run` before any node executes
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("invalid workflow graph: {0}")]
    GraphInvalid(#[from] GraphError),

    #[error("workflow store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by an execution ledger backend
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger write failed: {0}")]
    Write(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = NodeError::from_handler("n1", HandlerError::MissingParameter("url".into()));
        assert!(matches!(err, NodeError::NotConfigured { .. }));
        assert!(!err.is_retryable());
        assert!(!NodeError::HandlerNotFound("x".into()).is_retryable());
    }

    #[test]
    fn execution_errors_are_retryable() {
        let err = NodeError::from_handler("n1", HandlerError::failed("timeout"));
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "node 'n1' failed: timeout");
    }
}
