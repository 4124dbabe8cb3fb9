//! Command Router
//!
//! Resolves a command's slot to its owner and follows MOVED / ASK
//! redirects within a fixed budget.

use crate::config::RedirectBudget;
use crate::connection::NodePool;
use crate::error::{ClusterError, NodeError, Result};
use crate::refresh::{RefreshHandle, RefreshTrigger};
use crate::topology::TopologyMap;
use crate::types::{Command, NodeAddress, Redirect, Reply};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CommandRouter {
    topology: Arc<TopologyMap>,
    pool: Arc<NodePool>,
    refresh: RefreshHandle,
    budget: RedirectBudget,
}

impl CommandRouter {
    pub fn new(
        topology: Arc<TopologyMap>,
        pool: Arc<NodePool>,
        refresh: RefreshHandle,
        budget: RedirectBudget,
    ) -> Self {
        Self {
            topology,
            pool,
            refresh,
            budget,
        }
    }

    /// Node that currently owns the command's slot
    pub fn route(&self, command: &Command) -> Result<NodeAddress> {
        self.topology.node_for(command.slot())
    }

    /// Send a command to its owner, following redirects
    pub async fn execute(&self, command: &Command) -> Result<Reply> {
        let mut target = self.route(command)?;
        let mut asking = false;
        let mut moved_left = self.budget.moved;
        let mut ask_left = self.budget.ask;
        let mut redirects = 0;

        loop {
            let conn = match self.pool.get(&target).await {
                Ok(conn) => conn,
                Err(err) => return Err(err.into_cluster_error(&target)),
            };

            match conn.execute(command, asking).await {
                Ok(reply) => return Ok(reply),
                Err(NodeError::Redirect(redirect)) => {
                    redirects += 1;
                    match &redirect {
                        Redirect::Moved { slot, .. } => {
                            if moved_left == 0 {
                                warn!("MOVED budget exhausted for slot {}", slot);
                                return Err(ClusterError::RoutingExhausted { redirects });
                            }
                            moved_left -= 1;
                            self.refresh.request(RefreshTrigger::Moved { slot: *slot });
                            asking = false;
                        }
                        Redirect::Ask { slot, .. } => {
                            if ask_left == 0 {
                                warn!("ASK budget exhausted for slot {}", slot);
                                return Err(ClusterError::RoutingExhausted { redirects });
                            }
                            ask_left -= 1;
                            asking = true;
                        }
                    }
                    debug!(
                        "{} slot {} redirected from {} to {}",
                        command.name(),
                        redirect.slot(),
                        target,
                        redirect.target()
                    );
                    target = redirect.target().clone();
                }
                Err(err @ (NodeError::Io(_) | NodeError::Protocol(_))) => {
                    // Reconnect on next use
                    self.pool.evict(&target).await;
                    return Err(err.into_cluster_error(&target));
                }
                Err(err) => return Err(err.into_cluster_error(&target)),
            }
        }
    }
}
