use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClusterError;

/// Total number of hash slots (Redis-compatible)
pub const SLOT_COUNT: u16 = 16384;

/// Network address of a cluster node
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Connection URL understood by the `redis` crate
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = ClusterError;

    /// Parse `host:port`. The last `:` separates the port so bare IPv6
    /// hosts such as `::1:7000` still resolve.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClusterError::InvalidAddress(s.to_string()))?;
        if host.is_empty() {
            return Err(ClusterError::InvalidAddress(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ClusterError::InvalidAddress(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Slot range (inclusive start, inclusive end)
///
/// Only built through [`SlotRange::new`], so `start <= end < SLOT_COUNT`
/// always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotRange {
    start: u16,
    end: u16,
}

impl SlotRange {
    /// Create a range, rejecting inverted or out-of-space bounds
    pub fn new(start: u16, end: u16) -> Result<Self, ClusterError> {
        if start > end || end >= SLOT_COUNT {
            return Err(ClusterError::InvalidTopology(format!(
                "invalid slot range {}-{}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    pub fn count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// A primary node as seen in one topology snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub address: NodeAddress,
    /// Node ID reported by the cluster, if any
    pub id: Option<String>,
    /// Slots this node serves
    pub slots: Vec<SlotRange>,
    /// Replica addresses, kept for inspection only
    pub replicas: Vec<NodeAddress>,
}

impl Node {
    pub fn slot_count(&self) -> usize {
        self.slots.iter().map(SlotRange::count).sum()
    }
}

/// A single keyed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    key: Vec<u8>,
    args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument after the key
    pub fn arg(mut self, arg: impl Into<Vec<u8>>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn set(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::new("SET", key).arg(value)
    }

    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self::new("GET", key)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    /// Hash slot of the command's key
    pub fn slot(&self) -> u16 {
        crate::hash_slot::slot_for(&self.key)
    }
}

/// Decoded reply from a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Status(String),
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            Reply::Bulk(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
            Reply::Status(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Bulk(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => Ok(()),
            Reply::Status(s) => f.write_str(s),
            Reply::Int(n) => write!(f, "{}", n),
            Reply::Bulk(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Reply::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
        }
    }
}

/// Redirect signalled by a node that does not serve a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Slot ownership changed permanently
    Moved { slot: u16, target: NodeAddress },
    /// Slot is mid-migration; only this key is served elsewhere
    Ask { slot: u16, target: NodeAddress },
}

impl Redirect {
    pub fn target(&self) -> &NodeAddress {
        match self {
            Redirect::Moved { target, .. } | Redirect::Ask { target, .. } => target,
        }
    }

    pub fn slot(&self) -> u16 {
        match self {
            Redirect::Moved { slot, .. } | Redirect::Ask { slot, .. } => *slot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_address_parse() {
        let addr: NodeAddress = "127.0.0.1:7000".parse().unwrap();
        assert_eq!(addr, NodeAddress::new("127.0.0.1", 7000));
        assert_eq!(addr.to_string(), "127.0.0.1:7000");
        assert_eq!(addr.redis_url(), "redis://127.0.0.1:7000/");

        let v6: NodeAddress = "::1:7001".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.port, 7001);
    }

    #[test]
    fn test_node_address_parse_invalid() {
        assert!("localhost".parse::<NodeAddress>().is_err());
        assert!(":7000".parse::<NodeAddress>().is_err());
        assert!("host:notaport".parse::<NodeAddress>().is_err());
        assert!("host:70000".parse::<NodeAddress>().is_err());
    }

    #[test]
    fn test_slot_range() {
        let range = SlotRange::new(100, 199).unwrap();
        assert!(range.contains(100));
        assert!(range.contains(199));
        assert!(!range.contains(200));
        assert_eq!(range.count(), 100);

        assert!(SlotRange::new(10, 5).is_err());
        assert!(SlotRange::new(0, SLOT_COUNT).is_err());
        assert_eq!(SlotRange::new(0, SLOT_COUNT - 1).unwrap().count(), 16384);
        assert_eq!(SlotRange::new(SLOT_COUNT - 1, SLOT_COUNT - 1).unwrap().count(), 1);
    }

    #[test]
    fn test_command_builders() {
        let cmd = Command::set("hoge", "hoge");
        assert_eq!(cmd.name(), "SET");
        assert_eq!(cmd.key(), b"hoge");
        assert_eq!(cmd.args(), &[b"hoge".to_vec()]);

        let cmd = Command::new("EXPIRE", "k").arg("10");
        assert_eq!(cmd.args().len(), 1);
        assert_eq!(Command::get("foo").slot(), 12182);
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(Reply::ok().to_string(), "OK");
        assert_eq!(Reply::Int(3).to_string(), "3");
        assert_eq!(Reply::Bulk(b"bar".to_vec()).to_string(), "bar");
        assert_eq!(Reply::Nil.to_string(), "");
        assert_eq!(
            Reply::Array(vec![Reply::Int(1), Reply::Status("x".into())]).to_string(),
            "1\nx"
        );
    }

    #[test]
    fn test_reply_accessors() {
        assert_eq!(Reply::Bulk(b"42".to_vec()).as_int(), Some(42));
        assert_eq!(Reply::Int(7).as_int(), Some(7));
        assert_eq!(Reply::Nil.as_int(), None);
        assert_eq!(Reply::Bulk(b"host".to_vec()).as_str(), Some("host"));
        assert!(Reply::Int(1).as_array().is_none());
    }
}
