//! # Cluster Client
//!
//! Slot-aware access to Redis-compatible clusters:
//!
//! - Hash slot algorithm (CRC16 mod 16384, `{tag}` hash tags)
//! - Atomically replaced topology map built from `CLUSTER SLOTS`
//! - Command routing with bounded MOVED / ASK redirect handling
//! - Topology refresh on MOVED, optionally also on a fixed interval
//! - A session that owns connections and the refresh worker
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cluster_client::{ClusterConfig, ClusterSession, NodeAddress};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClusterConfig::new(NodeAddress::new("localhost", 17000))
//!         .with_periodic_refresh(Duration::from_secs(60));
//!     let session = ClusterSession::connect(config).await?;
//!
//!     let reply = session.set("hoge", "hoge").await?;
//!     println!("{}", reply);
//!
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod hash_slot;
pub mod redis_node;
pub mod refresh;
pub mod router;
pub mod session;
pub mod topology;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ClusterConfig, RedirectBudget, RefreshMode};
pub use connection::{Connector, NodeConnection, NodePool};
pub use error::{ClusterError, NodeError, Result};
pub use hash_slot::{HashSlot, slot_for};
pub use redis_node::{RedisConnector, parse_redirect};
pub use refresh::{RefreshPolicy, RefreshState, RefreshStats, RefreshTrigger};
pub use router::CommandRouter;
pub use session::{ClusterSession, SessionState};
pub use topology::{Topology, TopologyMap, TopologySummary};
pub use types::{Command, Node, NodeAddress, Redirect, Reply, SLOT_COUNT, SlotRange};
