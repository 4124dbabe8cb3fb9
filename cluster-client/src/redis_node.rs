//! Redis-backed node connections
//!
//! RESP framing, multiplexing and reconnect-free request correlation come
//! from the `redis` crate; this module only adapts its types.

use crate::connection::{Connector, NodeConnection};
use crate::error::NodeError;
use crate::types::{Command, NodeAddress, Redirect, Reply};
use async_trait::async_trait;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::{Client, ErrorKind, RedisError, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Connects to nodes with `redis::aio::MultiplexedConnection`
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(
        &self,
        address: &NodeAddress,
        timeout: Duration,
    ) -> Result<Arc<dyn NodeConnection>, NodeError> {
        let client = Client::open(address.redis_url()).map_err(map_redis_error)?;
        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| NodeError::Io(format!("connect to {} timed out", address)))?
            .map_err(map_redis_error)?;

        debug!("Opened multiplexed connection to {}", address);
        Ok(Arc::new(RedisNode {
            address: address.clone(),
            conn,
        }))
    }
}

/// A multiplexed connection to one node
pub struct RedisNode {
    address: NodeAddress,
    conn: MultiplexedConnection,
}

#[async_trait]
impl NodeConnection for RedisNode {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn execute(&self, command: &Command, asking: bool) -> Result<Reply, NodeError> {
        let mut cmd = redis::cmd(command.name());
        cmd.arg(command.key());
        for arg in command.args() {
            cmd.arg(arg.as_slice());
        }

        // Clones share the same multiplexed socket
        let mut conn = self.conn.clone();
        let value = if asking {
            // ASKING must directly precede the command on the same connection
            let mut pipe = redis::pipe();
            pipe.cmd("ASKING").add_command(cmd);
            let mut values = conn
                .req_packed_commands(&pipe, 1, 1)
                .await
                .map_err(map_redis_error)?;
            values
                .pop()
                .ok_or_else(|| NodeError::Protocol("empty pipeline reply".to_string()))?
        } else {
            conn.req_packed_command(&cmd)
                .await
                .map_err(map_redis_error)?
        };

        convert_value(value)
    }

    async fn cluster_slots(&self) -> Result<Reply, NodeError> {
        let mut cmd = redis::cmd("CLUSTER");
        cmd.arg("SLOTS");
        let mut conn = self.conn.clone();
        let value = conn
            .req_packed_command(&cmd)
            .await
            .map_err(map_redis_error)?;
        convert_value(value)
    }

    /// Advisory: the socket closes once the pool and every in-flight
    /// command have dropped their clone of the handle
    async fn close(&self) {
        debug!("Releasing connection to {}", self.address);
    }
}

/// Parse `MOVED <slot> <host:port>` / `ASK <slot> <host:port>`
pub fn parse_redirect(message: &str) -> Option<Redirect> {
    let mut parts = message.trim().trim_start_matches('-').split_whitespace();
    let kind = parts.next()?;
    let slot = parts.next()?.parse::<u16>().ok()?;
    let target: NodeAddress = parts.next()?.parse().ok()?;

    match kind {
        "MOVED" => Some(Redirect::Moved { slot, target }),
        "ASK" => Some(Redirect::Ask { slot, target }),
        _ => None,
    }
}

fn map_redis_error(err: RedisError) -> NodeError {
    let prefix = match err.kind() {
        ErrorKind::Moved => Some("MOVED"),
        ErrorKind::Ask => Some("ASK"),
        _ => None,
    };
    if let (Some(prefix), Some(detail)) = (prefix, err.detail()) {
        if let Some(redirect) = parse_redirect(&format!("{} {}", prefix, detail)) {
            return NodeError::Redirect(redirect);
        }
    }

    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        NodeError::Io(err.to_string())
    } else {
        NodeError::Server(err.to_string())
    }
}

fn convert_value(value: Value) -> Result<Reply, NodeError> {
    Ok(match value {
        Value::Nil => Reply::Nil,
        Value::Okay => Reply::ok(),
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(bytes) => Reply::Bulk(bytes),
        Value::SimpleString(s) => Reply::Status(s),
        Value::Array(items) | Value::Set(items) => Reply::Array(
            items
                .into_iter()
                .map(convert_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Boolean(b) => Reply::Int(i64::from(b)),
        Value::Double(d) => Reply::Status(d.to_string()),
        other => {
            return Err(NodeError::Protocol(format!(
                "unsupported reply type: {:?}",
                other
            )));
        }
    })
}
