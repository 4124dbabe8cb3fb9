//! # Demo Server
//!
//! Small HTTP service that writes through a [`cluster_client::ClusterSession`]
//! so topology refresh can be observed against a live cluster.
//!
//! - `GET /test` runs `SET hoge hoge` and returns the store's reply
//! - `GET /health` reports liveness
//! - `GET /cluster/topology` shows the installed slot map and refresh counters

pub mod config;
pub mod error;
pub mod server;

pub use config::{ENABLE_REFRESH_ENV, LoggingConfig, ServerConfig};
pub use error::ApiError;
pub use server::{AppState, create_router};
