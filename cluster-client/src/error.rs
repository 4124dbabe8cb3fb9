//! Error types for the cluster client

use std::time::Duration;
use thiserror::Error;

use crate::types::{NodeAddress, Redirect};

/// Result type alias for cluster client operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors surfaced to callers of the session and topology map
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No topology has been installed yet
    #[error("Cluster topology unknown")]
    TopologyUnknown,

    /// Redirect retry budget exceeded
    #[error("Routing exhausted after {redirects} redirect(s)")]
    RoutingExhausted { redirects: usize },

    /// No seed node answered during open
    #[error("Cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// A topology fetch failed; logged by the refresh worker, never returned
    /// from `execute`
    #[error("Topology refresh failed: {0}")]
    RefreshFailed(String),

    /// Slot ranges do not partition the slot space
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Connection error on {node}: {message}")]
    Connection { node: NodeAddress, message: String },

    /// Error reply from the store (ERR, WRONGTYPE, ...)
    #[error("Server error: {0}")]
    Server(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session closed")]
    SessionClosed,

    #[error("Invalid node address: {0}")]
    InvalidAddress(String),
}

/// Failure of a single request against a single node
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("redirected: {0:?}")]
    Redirect(Redirect),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl NodeError {
    /// Lift a node failure into a caller-facing error
    pub fn into_cluster_error(self, node: &NodeAddress) -> ClusterError {
        match self {
            NodeError::Server(message) => ClusterError::Server(message),
            NodeError::Redirect(redirect) => ClusterError::Connection {
                node: node.clone(),
                message: format!("unexpected redirect: {:?}", redirect),
            },
            NodeError::Io(message) | NodeError::Protocol(message) => ClusterError::Connection {
                node: node.clone(),
                message,
            },
        }
    }
}
