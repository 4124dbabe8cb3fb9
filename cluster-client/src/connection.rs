//! Node connections
//!
//! The wire protocol lives behind [`Connector`] / [`NodeConnection`]; the
//! session keeps at most one shared connection per node in a [`NodePool`].

use crate::error::NodeError;
use crate::types::{Command, NodeAddress, Reply};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One logical connection to a single node
///
/// Implementations must allow concurrent `execute` calls; each call's
/// request and reply are correlated independently.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    fn address(&self) -> &NodeAddress;

    /// Run a command; with `asking` the command is preceded by `ASKING`
    async fn execute(&self, command: &Command, asking: bool) -> Result<Reply, NodeError>;

    /// Raw `CLUSTER SLOTS` reply
    async fn cluster_slots(&self) -> Result<Reply, NodeError>;

    /// Release the connection
    ///
    /// For multiplexed connections this is advisory: the socket goes away
    /// when the last `Arc` is dropped, which the pool arranges by forgetting
    /// the connection before calling `close`.
    async fn close(&self);
}

/// Opens node connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &NodeAddress,
        timeout: Duration,
    ) -> Result<Arc<dyn NodeConnection>, NodeError>;
}

#[derive(Default)]
struct PoolState {
    connections: HashMap<NodeAddress, Arc<dyn NodeConnection>>,
    closed: bool,
}

/// Connections owned by a session, keyed by node address
pub struct NodePool {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    state: RwLock<PoolState>,
}

impl NodePool {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            state: RwLock::new(PoolState::default()),
        }
    }

    /// Shared connection to `address`, connecting on first use
    pub async fn get(&self, address: &NodeAddress) -> Result<Arc<dyn NodeConnection>, NodeError> {
        {
            let state = self.state.read();
            if state.closed {
                return Err(NodeError::Io("connection pool closed".to_string()));
            }
            if let Some(conn) = state.connections.get(address) {
                return Ok(Arc::clone(conn));
            }
        }

        let conn = self
            .connector
            .connect(address, self.connect_timeout)
            .await?;

        // Another caller may have connected meanwhile; keep the first one
        let (kept, surplus) = {
            let mut state = self.state.write();
            if state.closed {
                (None, Some(conn))
            } else if let Some(existing) = state.connections.get(address) {
                (Some(Arc::clone(existing)), Some(conn))
            } else {
                state
                    .connections
                    .insert(address.clone(), Arc::clone(&conn));
                debug!("Connected to node {}", address);
                (Some(conn), None)
            }
        };

        if let Some(surplus) = surplus {
            surplus.close().await;
        }
        kept.ok_or_else(|| NodeError::Io("connection pool closed".to_string()))
    }

    /// Close and forget the connection to `address`
    pub async fn evict(&self, address: &NodeAddress) {
        let removed = self.state.write().connections.remove(address);
        if let Some(conn) = removed {
            debug!("Evicting connection to node {}", address);
            conn.close().await;
        }
    }

    /// Close connections whose address fails `keep`
    pub async fn retain(&self, keep: impl Fn(&NodeAddress) -> bool) {
        let stale: Vec<Arc<dyn NodeConnection>> = {
            let mut state = self.state.write();
            let addresses: Vec<NodeAddress> = state
                .connections
                .keys()
                .filter(|addr| !keep(addr))
                .cloned()
                .collect();
            addresses
                .iter()
                .filter_map(|addr| state.connections.remove(addr))
                .collect()
        };

        for conn in stale {
            debug!("Closing stale connection to node {}", conn.address());
            conn.close().await;
        }
    }

    /// Close every connection but keep accepting new ones
    pub async fn release_all(&self) {
        let drained: Vec<Arc<dyn NodeConnection>> = {
            let mut state = self.state.write();
            state.connections.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close().await;
        }
    }

    /// Close every connection and refuse new ones
    pub async fn close_all(&self) {
        self.state.write().closed = true;
        self.release_all().await;
    }

    pub fn len(&self) -> usize {
        self.state.read().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn addresses(&self) -> Vec<NodeAddress> {
        let mut addresses: Vec<NodeAddress> =
            self.state.read().connections.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}
