//! Cluster Topology Map
//!
//! Immutable slot-to-node snapshots and the shared holder that swaps them.

use crate::error::{ClusterError, Result};
use crate::types::{Node, NodeAddress, Reply, SLOT_COUNT, SlotRange};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// One immutable view of slot ownership
#[derive(Debug, Clone)]
pub struct Topology {
    version: u64,
    refreshed_at: DateTime<Utc>,
    nodes: Vec<Node>,
    /// Sorted by range start; the index points into `nodes`
    slots: Vec<(SlotRange, usize)>,
}

impl Topology {
    /// Build a topology from `(range, owner)` pairs
    pub fn from_ranges(ranges: impl IntoIterator<Item = (SlotRange, NodeAddress)>) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: HashMap<NodeAddress, usize> = HashMap::new();
        let mut slots = Vec::new();

        for (range, address) in ranges {
            let idx = *index.entry(address.clone()).or_insert_with(|| {
                nodes.push(Node {
                    address,
                    id: None,
                    slots: Vec::new(),
                    replicas: Vec::new(),
                });
                nodes.len() - 1
            });
            nodes[idx].slots.push(range);
            slots.push((range, idx));
        }

        slots.sort_by_key(|(range, _)| range.start());
        Self {
            version: 0,
            refreshed_at: Utc::now(),
            nodes,
            slots,
        }
    }

    /// Parse a `CLUSTER SLOTS` reply
    ///
    /// Each entry is `[start, end, [host, port, id?, ...], replica...]`. An
    /// empty host means "the node that answered", so `queried` fills it in.
    pub fn from_cluster_slots(reply: &Reply, queried: &NodeAddress) -> Result<Self> {
        let entries = reply.as_array().ok_or_else(|| {
            ClusterError::InvalidTopology("CLUSTER SLOTS: expected array".to_string())
        })?;

        let mut ranges = Vec::with_capacity(entries.len());
        let mut ids: HashMap<NodeAddress, String> = HashMap::new();
        let mut replicas: HashMap<NodeAddress, Vec<NodeAddress>> = HashMap::new();

        for entry in entries {
            let items = entry.as_array().ok_or_else(|| {
                ClusterError::InvalidTopology("CLUSTER SLOTS: expected entry array".to_string())
            })?;
            if items.len() < 3 {
                return Err(ClusterError::InvalidTopology(
                    "CLUSTER SLOTS: entry too short".to_string(),
                ));
            }

            let start = parse_slot(&items[0])?;
            let end = parse_slot(&items[1])?;
            let range = SlotRange::new(start, end)?;

            let (master, master_id) = parse_node(&items[2], queried)?;
            if let Some(id) = master_id {
                ids.insert(master.clone(), id);
            }
            for replica in &items[3..] {
                let (address, _) = parse_node(replica, queried)?;
                let known = replicas.entry(master.clone()).or_default();
                if !known.contains(&address) {
                    known.push(address);
                }
            }
            ranges.push((range, master));
        }

        let mut topology = Self::from_ranges(ranges);
        for node in &mut topology.nodes {
            node.id = ids.remove(&node.address);
            node.replicas = replicas.remove(&node.address).unwrap_or_default();
        }
        Ok(topology)
    }

    /// Check that slot ranges cover `[0, SLOT_COUNT)` exactly once
    pub fn validate(&self) -> Result<()> {
        let mut next: u32 = 0;
        for (range, _) in &self.slots {
            match u32::from(range.start()).cmp(&next) {
                Ordering::Greater => {
                    return Err(ClusterError::InvalidTopology(format!(
                        "slots {}-{} are not covered",
                        next,
                        range.start() - 1
                    )));
                }
                Ordering::Less => {
                    return Err(ClusterError::InvalidTopology(format!(
                        "slot range {} overlaps a previous range",
                        range
                    )));
                }
                Ordering::Equal => next = u32::from(range.end()) + 1,
            }
        }
        if next != u32::from(SLOT_COUNT) {
            return Err(ClusterError::InvalidTopology(format!(
                "slots {}-{} are not covered",
                next,
                SLOT_COUNT - 1
            )));
        }
        Ok(())
    }

    /// Owner of a slot in this snapshot
    pub fn node_for(&self, slot: u16) -> Option<&NodeAddress> {
        self.slots
            .binary_search_by(|(range, _)| {
                if slot < range.start() {
                    Ordering::Greater
                } else if slot > range.end() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok()
            .map(|i| &self.nodes[self.slots[i].1].address)
    }

    /// Version assigned when installed; 0 for a detached snapshot
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.nodes.iter().map(|n| &n.address)
    }

    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.nodes.iter().any(|n| &n.address == address)
    }

    pub fn summary(&self) -> TopologySummary {
        TopologySummary {
            version: self.version,
            refreshed_at: self.refreshed_at,
            nodes: self
                .nodes
                .iter()
                .map(|node| NodeSummary {
                    address: node.address.to_string(),
                    id: node.id.clone(),
                    slots: node.slots.iter().map(ToString::to_string).collect(),
                    slot_count: node.slot_count(),
                    replicas: node.replicas.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}

fn parse_slot(value: &Reply) -> Result<u16> {
    value
        .as_int()
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| ClusterError::InvalidTopology(format!("invalid slot number: {:?}", value)))
}

fn parse_node(value: &Reply, queried: &NodeAddress) -> Result<(NodeAddress, Option<String>)> {
    let items = value
        .as_array()
        .filter(|items| items.len() >= 2)
        .ok_or_else(|| {
            ClusterError::InvalidTopology(format!("invalid node entry: {:?}", value))
        })?;

    let host = items[0]
        .as_str()
        .ok_or_else(|| ClusterError::InvalidTopology("invalid node host".to_string()))?;
    let host = if host.is_empty() || host == "?" {
        queried.host.clone()
    } else {
        host.to_string()
    };
    let port = items[1]
        .as_int()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| ClusterError::InvalidTopology("invalid node port".to_string()))?;
    let id = items.get(2).and_then(Reply::as_str).map(str::to_string);

    Ok((NodeAddress::new(host, port), id))
}

/// Serializable view of a topology snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TopologySummary {
    pub version: u64,
    pub refreshed_at: DateTime<Utc>,
    pub nodes: Vec<NodeSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub address: String,
    pub id: Option<String>,
    pub slots: Vec<String>,
    pub slot_count: usize,
    pub replicas: Vec<String>,
}

#[derive(Default)]
struct MapState {
    current: Option<Arc<Topology>>,
    installed: u64,
}

/// Shared, atomically replaced topology
///
/// Readers clone the current `Arc` under a short read guard; `replace` holds
/// the write guard only for the swap.
#[derive(Default)]
pub struct TopologyMap {
    state: RwLock<MapState>,
}

impl TopologyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, if one has been installed
    pub fn snapshot(&self) -> Option<Arc<Topology>> {
        self.state.read().current.clone()
    }

    pub fn is_known(&self) -> bool {
        self.state.read().current.is_some()
    }

    /// Owner of a slot in the current snapshot
    pub fn node_for(&self, slot: u16) -> Result<NodeAddress> {
        let topology = self.snapshot().ok_or(ClusterError::TopologyUnknown)?;
        topology.node_for(slot).cloned().ok_or_else(|| {
            ClusterError::InvalidTopology(format!("slot {} has no owner", slot))
        })
    }

    /// Validate and install a new snapshot, returning its version
    pub fn replace(&self, mut topology: Topology) -> Result<u64> {
        topology.validate()?;

        let mut state = self.state.write();
        state.installed += 1;
        topology.version = state.installed;
        let version = topology.version;
        let node_count = topology.nodes.len();
        state.current = Some(Arc::new(topology));
        drop(state);

        info!(
            "Installed cluster topology v{} ({} nodes)",
            version, node_count
        );
        Ok(version)
    }

    /// Drop the current snapshot
    pub fn clear(&self) {
        self.state.write().current = None;
        debug!("Cleared cluster topology");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> NodeAddress {
        NodeAddress::new("127.0.0.1", port)
    }

    fn range(start: u16, end: u16) -> SlotRange {
        SlotRange::new(start, end).unwrap()
    }

    fn two_nodes() -> Topology {
        Topology::from_ranges([
            (range(0, 8191), addr(7000)),
            (range(8192, 16383), addr(7001)),
        ])
    }

    fn node_entry(host: &str, port: i64, id: Option<&str>) -> Reply {
        let mut items = vec![Reply::Bulk(host.as_bytes().to_vec()), Reply::Int(port)];
        if let Some(id) = id {
            items.push(Reply::Bulk(id.as_bytes().to_vec()));
        }
        Reply::Array(items)
    }

    #[test]
    fn test_empty_map_is_unknown() {
        let map = TopologyMap::new();
        assert!(!map.is_known());
        assert!(matches!(map.node_for(5), Err(ClusterError::TopologyUnknown)));
    }

    #[test]
    fn test_two_node_routing() {
        let map = TopologyMap::new();
        assert_eq!(map.replace(two_nodes()).unwrap(), 1);

        let slot = crate::hash_slot::slot_for(b"foo");
        assert_eq!(slot, 12182);
        assert_eq!(map.node_for(slot).unwrap(), addr(7001));
        assert_eq!(map.node_for(0).unwrap(), addr(7000));
        assert_eq!(map.node_for(8191).unwrap(), addr(7000));
        assert_eq!(map.node_for(8192).unwrap(), addr(7001));
    }

    #[test]
    fn test_replace_increments_version() {
        let map = TopologyMap::new();
        assert_eq!(map.replace(two_nodes()).unwrap(), 1);
        assert_eq!(map.replace(two_nodes()).unwrap(), 2);
        assert_eq!(map.snapshot().unwrap().version(), 2);

        map.clear();
        assert!(!map.is_known());
        assert_eq!(map.replace(two_nodes()).unwrap(), 3);
    }

    #[test]
    fn test_replace_rejects_gap() {
        let map = TopologyMap::new();
        let gap = Topology::from_ranges([
            (range(0, 8000), addr(7000)),
            (range(8192, 16383), addr(7001)),
        ]);
        assert!(matches!(
            map.replace(gap),
            Err(ClusterError::InvalidTopology(_))
        ));
        assert!(!map.is_known());
    }

    #[test]
    fn test_replace_rejects_overlap_and_short_tail() {
        let map = TopologyMap::new();
        let overlap = Topology::from_ranges([
            (range(0, 9000), addr(7000)),
            (range(8192, 16383), addr(7001)),
        ]);
        assert!(map.replace(overlap).is_err());

        let short = Topology::from_ranges([(range(0, 16000), addr(7000))]);
        assert!(map.replace(short).is_err());

        let empty = Topology::from_ranges(Vec::new());
        assert!(map.replace(empty).is_err());
    }

    #[test]
    fn test_accepted_maps_partition_slot_space() {
        // Every accepted map resolves every slot to exactly one range
        let map = TopologyMap::new();
        for node_count in [1u16, 2, 3, 5, 7, 16] {
            let per_node = SLOT_COUNT / node_count;
            let ranges = (0..node_count).map(|i| {
                let start = i * per_node;
                let end = if i == node_count - 1 {
                    SLOT_COUNT - 1
                } else {
                    start + per_node - 1
                };
                (range(start, end), addr(7000 + i))
            });
            map.replace(Topology::from_ranges(ranges)).unwrap();

            let topology = map.snapshot().unwrap();
            let mut covered = vec![0u8; SLOT_COUNT as usize];
            for node in topology.nodes() {
                for r in &node.slots {
                    for slot in r.start()..=r.end() {
                        covered[slot as usize] += 1;
                    }
                }
            }
            assert!(covered.iter().all(|&c| c == 1));
        }
    }

    #[test]
    fn test_from_cluster_slots() {
        let queried = addr(7000);
        let reply = Reply::Array(vec![
            Reply::Array(vec![
                Reply::Int(5461),
                Reply::Int(16383),
                node_entry("127.0.0.1", 7001, Some("b")),
                node_entry("127.0.0.1", 7004, Some("e")),
            ]),
            Reply::Array(vec![
                Reply::Int(0),
                Reply::Int(5460),
                node_entry("", 7000, Some("a")),
                node_entry("127.0.0.1", 7003, None),
            ]),
        ]);

        let topology = Topology::from_cluster_slots(&reply, &queried).unwrap();
        topology.validate().unwrap();
        assert_eq!(topology.nodes().len(), 2);
        assert_eq!(topology.node_for(0), Some(&addr(7000)));
        assert_eq!(topology.node_for(5461), Some(&addr(7001)));

        let first = topology
            .nodes()
            .iter()
            .find(|n| n.address == addr(7000))
            .unwrap();
        assert_eq!(first.id.as_deref(), Some("a"));
        assert_eq!(first.replicas, vec![addr(7003)]);
        assert_eq!(first.slot_count(), 5461);
    }

    #[test]
    fn test_from_cluster_slots_rejects_garbage() {
        let queried = addr(7000);
        assert!(Topology::from_cluster_slots(&Reply::Int(1), &queried).is_err());

        let short = Reply::Array(vec![Reply::Array(vec![Reply::Int(0), Reply::Int(1)])]);
        assert!(Topology::from_cluster_slots(&short, &queried).is_err());

        let bad_slot = Reply::Array(vec![Reply::Array(vec![
            Reply::Int(0),
            Reply::Int(20000),
            node_entry("h", 1, None),
        ])]);
        assert!(Topology::from_cluster_slots(&bad_slot, &queried).is_err());

        let inverted = Reply::Array(vec![Reply::Array(vec![
            Reply::Int(10),
            Reply::Int(5),
            node_entry("h", 1, None),
        ])]);
        assert!(matches!(
            Topology::from_cluster_slots(&inverted, &queried),
            Err(ClusterError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_summary_of_unvalidated_snapshot() {
        // Partial maps never reach the holder, but can still be inspected
        let partial = Topology::from_ranges([(range(100, 199), addr(7000))]);
        assert!(partial.validate().is_err());

        let summary = partial.summary();
        assert_eq!(summary.version, 0);
        assert_eq!(summary.nodes[0].slot_count, 100);
        assert_eq!(partial.nodes()[0].slot_count(), 100);
    }

    #[test]
    fn test_summary() {
        let map = TopologyMap::new();
        map.replace(two_nodes()).unwrap();
        let summary = map.snapshot().unwrap().summary();
        assert_eq!(summary.version, 1);
        assert_eq!(summary.nodes.len(), 2);
        assert_eq!(summary.nodes[0].slots, vec!["0-8191".to_string()]);
        assert_eq!(summary.nodes[0].slot_count, 8192);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["nodes"][1]["address"], "127.0.0.1:7001");
    }

    #[test]
    fn test_concurrent_replace_and_lookup_never_mix_versions() {
        // Version N assigns every slot to port 7000 + (N % 2); a reader must
        // always see both halves agree with the snapshot's own version.
        let map = Arc::new(TopologyMap::new());
        let build = |port: u16| {
            Topology::from_ranges([
                (range(0, 8191), addr(port)),
                (range(8192, 16383), addr(port)),
            ])
        };
        map.replace(build(7001)).unwrap();

        let writer = {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let next = map.snapshot().unwrap().version() + 1;
                    map.replace(build(7000 + (next % 2) as u16)).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || {
                    for _ in 0..5000 {
                        let snapshot = map.snapshot().unwrap();
                        let expected = addr(7000 + (snapshot.version() % 2) as u16);
                        assert_eq!(snapshot.node_for(0), Some(&expected));
                        assert_eq!(snapshot.node_for(16383), Some(&expected));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
