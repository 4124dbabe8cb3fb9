//! Client Session
//!
//! Owns the topology map, the node connections and the refresh worker for
//! one logical connection to a cluster.

use crate::config::{ClusterConfig, RefreshMode};
use crate::connection::{Connector, NodePool};
use crate::error::{ClusterError, NodeError, Result};
use crate::redis_node::RedisConnector;
use crate::refresh::{
    RefreshHandle, RefreshPolicy, RefreshState, RefreshStats, RefreshTrigger, TopologyFetcher,
    spawn_refresh_worker,
};
use crate::router::CommandRouter;
use crate::topology::{Topology, TopologyMap};
use crate::types::{Command, NodeAddress, Reply};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Constructed, no topology yet
    New,
    Ready,
    Closed,
}

struct SessionInner {
    config: ClusterConfig,
    topology: Arc<TopologyMap>,
    pool: Arc<NodePool>,
    router: CommandRouter,
}

impl SessionInner {
    /// Fetch and validate a topology from one node
    async fn fetch_from(&self, address: &NodeAddress) -> Result<Topology> {
        let conn = self
            .pool
            .get(address)
            .await
            .map_err(|err| err.into_cluster_error(address))?;

        let reply = match conn.cluster_slots().await {
            Ok(reply) => reply,
            Err(err) => {
                if matches!(err, NodeError::Io(_)) {
                    self.pool.evict(address).await;
                }
                return Err(err.into_cluster_error(address));
            }
        };

        let topology = Topology::from_cluster_slots(&reply, address)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Install a topology and drop connections to nodes that left it
    async fn install(&self, topology: Topology) -> Result<u64> {
        let version = self.topology.replace(topology)?;
        if let Some(current) = self.topology.snapshot() {
            self.pool.retain(|address| current.contains(address)).await;
        }
        Ok(version)
    }
}

#[async_trait]
impl TopologyFetcher for SessionInner {
    async fn refresh_topology(&self) -> Result<u64> {
        // Known nodes first, then seeds
        let mut candidates: Vec<NodeAddress> = self
            .topology
            .snapshot()
            .map(|topology| topology.addresses().cloned().collect())
            .unwrap_or_default();
        for seed in &self.config.seeds {
            if !candidates.contains(seed) {
                candidates.push(seed.clone());
            }
        }

        let mut last_error = None;
        for address in &candidates {
            match self.fetch_from(address).await {
                Ok(topology) => return self.install(topology).await,
                Err(err) => {
                    debug!("Topology fetch from {} failed: {}", address, err);
                    last_error = Some(err);
                }
            }
        }

        Err(ClusterError::RefreshFailed(
            last_error.map_or_else(|| "no known nodes".to_string(), |err| err.to_string()),
        ))
    }
}

struct Lifecycle {
    triggers: Option<mpsc::UnboundedReceiver<RefreshTrigger>>,
    worker: Option<JoinHandle<()>>,
}

/// One logical connection to a cluster
///
/// Share it behind an `Arc`; `execute` may be called concurrently.
///
/// ```no_run
/// use cluster_client::{ClusterConfig, ClusterSession, NodeAddress};
///
/// # async fn demo() -> cluster_client::Result<()> {
/// let config = ClusterConfig::new(NodeAddress::new("localhost", 17000));
/// let session = ClusterSession::connect(config).await?;
/// let reply = session.set("hoge", "hoge").await?;
/// assert_eq!(reply.to_string(), "OK");
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ClusterSession {
    inner: Arc<SessionInner>,
    policy: Arc<RefreshPolicy>,
    state: RwLock<SessionState>,
    lifecycle: Mutex<Lifecycle>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClusterSession {
    /// Build an unopened session; no I/O happens until [`open`](Self::open)
    pub fn new(config: ClusterConfig, connector: Arc<dyn Connector>) -> Self {
        let policy = Arc::new(RefreshPolicy::new(
            config.refresh_mode,
            config.refresh_backoff,
        ));
        let (refresh, triggers) = RefreshHandle::new(Arc::clone(&policy));
        let topology = Arc::new(TopologyMap::new());
        let pool = Arc::new(NodePool::new(connector, config.connect_timeout));
        let router = CommandRouter::new(
            Arc::clone(&topology),
            Arc::clone(&pool),
            refresh,
            config.redirect_budget,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                config,
                topology,
                pool,
                router,
            }),
            policy,
            state: RwLock::new(SessionState::New),
            lifecycle: Mutex::new(Lifecycle {
                triggers: Some(triggers),
                worker: None,
            }),
            shutdown_tx,
        }
    }

    /// Open a session over the `redis` crate
    pub async fn connect(config: ClusterConfig) -> Result<Self> {
        let session = Self::new(config, Arc::new(RedisConnector));
        session.open().await?;
        Ok(session)
    }

    /// Fetch the initial topology from the first seed that answers
    ///
    /// On failure every connection opened during the attempt is released
    /// and the session stays `New`.
    pub async fn open(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Closed => return Err(ClusterError::SessionClosed),
            SessionState::New => {}
        }

        let seeds = &self.inner.config.seeds;
        info!(
            "Opening cluster session (seeds: {}, refresh: {})",
            seeds
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            self.policy.mode().name()
        );

        let mut last_error = None;
        let mut version = None;
        for seed in seeds {
            let attempt = match self.inner.fetch_from(seed).await {
                Ok(topology) => self.inner.install(topology).await,
                Err(err) => Err(err),
            };
            match attempt {
                Ok(v) => {
                    version = Some(v);
                    break;
                }
                Err(err) => {
                    warn!("Seed {} did not provide a topology: {}", seed, err);
                    last_error = Some(err);
                }
            }
        }

        let Some(version) = version else {
            self.inner.pool.release_all().await;
            return Err(ClusterError::ClusterUnreachable(last_error.map_or_else(
                || "no seed nodes configured".to_string(),
                |err| err.to_string(),
            )));
        };

        if let Some(triggers) = lifecycle.triggers.take() {
            lifecycle.worker = Some(spawn_refresh_worker(
                Arc::clone(&self.policy),
                Arc::clone(&self.inner) as Arc<dyn TopologyFetcher>,
                triggers,
                self.shutdown_tx.subscribe(),
            ));
        }

        *self.state.write() = SessionState::Ready;
        info!("Cluster session ready (topology v{})", version);
        Ok(())
    }

    /// Route and run a command
    pub async fn execute(&self, command: &Command) -> Result<Reply> {
        match self.state() {
            SessionState::Closed => return Err(ClusterError::SessionClosed),
            SessionState::New => return Err(ClusterError::TopologyUnknown),
            SessionState::Ready => {}
        }

        let timeout = self.inner.config.command_timeout;
        match tokio::time::timeout(timeout, self.inner.router.execute(command)).await {
            Err(_) => Err(ClusterError::Timeout(timeout)),
            // Lost a race with close(): the map or the pool went away mid-call
            Ok(Err(_)) if self.state() == SessionState::Closed => Err(ClusterError::SessionClosed),
            Ok(result) => result,
        }
    }

    pub async fn set(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<Reply> {
        self.execute(&Command::set(key, value)).await
    }

    pub async fn get(&self, key: impl Into<Vec<u8>>) -> Result<Reply> {
        self.execute(&Command::get(key)).await
    }

    /// Node that would receive `command` right now
    pub fn route(&self, command: &Command) -> Result<NodeAddress> {
        self.inner.router.route(command)
    }

    /// Stop the refresh worker and release every connection
    ///
    /// Idempotent and valid in any state, including after a failed `open`.
    pub async fn close(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == SessionState::Closed {
            return;
        }
        *self.state.write() = SessionState::Closed;

        let _ = self.shutdown_tx.send(true);
        if let Some(worker) = lifecycle.worker.take() {
            if let Err(err) = worker.await {
                warn!("Refresh worker ended abnormally: {}", err);
            }
        }
        lifecycle.triggers = None;

        self.inner.pool.close_all().await;
        self.inner.topology.clear();
        info!("Cluster session closed");
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn topology(&self) -> Option<Arc<Topology>> {
        self.inner.topology.snapshot()
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.policy.mode()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.policy.state()
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.policy.stats()
    }

    /// Nodes with an open connection
    pub fn connected_nodes(&self) -> Vec<NodeAddress> {
        self.inner.pool.addresses()
    }
}
