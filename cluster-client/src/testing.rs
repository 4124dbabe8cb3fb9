//! In-memory cluster for tests
//!
//! [`MemoryCluster`] plays the part of a set of store nodes: it answers
//! `CLUSTER SLOTS`, serves `SET`/`GET`/`DEL`, and replies MOVED / ASK the
//! way a real node does when asked about a slot it does not serve.

use crate::connection::{Connector, NodeConnection};
use crate::error::NodeError;
use crate::types::{Command, NodeAddress, Redirect, Reply, SLOT_COUNT, SlotRange};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Default)]
struct NodeData {
    data: HashMap<Vec<u8>, Vec<u8>>,
    commands: u64,
}

struct ClusterState {
    /// Authoritative owner of every slot
    owners: Vec<NodeAddress>,
    nodes: HashMap<NodeAddress, NodeData>,
    unreachable: HashSet<NodeAddress>,
    slots_unavailable: HashSet<NodeAddress>,
    /// slot -> importing node
    migrating: HashMap<u16, NodeAddress>,
    scripted: HashMap<NodeAddress, VecDeque<Result<Reply, NodeError>>>,
    latency: Option<Duration>,
    connects: usize,
    closes: usize,
    cluster_slots_calls: usize,
    asking_commands: usize,
}

/// A programmable in-memory cluster
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// Cluster whose slot ownership is given by `layout`
    ///
    /// Slots not listed belong to the first node.
    pub fn new(layout: &[(SlotRange, NodeAddress)]) -> Self {
        let first = layout
            .first()
            .map(|(_, addr)| addr.clone())
            .unwrap_or_else(|| NodeAddress::new("127.0.0.1", 7000));
        let mut owners = vec![first; SLOT_COUNT as usize];
        let mut nodes = HashMap::new();
        for (range, address) in layout {
            for slot in range.start()..=range.end() {
                owners[slot as usize] = address.clone();
            }
            nodes.entry(address.clone()).or_insert_with(NodeData::default);
        }

        Self {
            state: Arc::new(Mutex::new(ClusterState {
                owners,
                nodes,
                unreachable: HashSet::new(),
                slots_unavailable: HashSet::new(),
                migrating: HashMap::new(),
                scripted: HashMap::new(),
                latency: None,
                connects: 0,
                closes: 0,
                cluster_slots_calls: 0,
                asking_commands: 0,
            })),
        }
    }

    /// Split the slot space evenly across `addresses`
    pub fn with_even_slots(addresses: &[NodeAddress]) -> Self {
        let count = addresses.len().max(1) as u16;
        let per_node = SLOT_COUNT / count;
        let layout: Vec<(SlotRange, NodeAddress)> = addresses
            .iter()
            .enumerate()
            .filter_map(|(i, address)| {
                let start = i as u16 * per_node;
                let end = if i as u16 == count - 1 {
                    SLOT_COUNT - 1
                } else {
                    start + per_node - 1
                };
                let range = SlotRange::new(start, end).ok()?;
                Some((range, address.clone()))
            })
            .collect();
        Self::new(&layout)
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            cluster: self.clone(),
        })
    }

    /// Reassign slots; nodes answer MOVED for them from now on
    pub fn move_slots(&self, range: SlotRange, to: &NodeAddress) {
        let mut state = self.state.lock();
        for slot in range.start()..=range.end() {
            state.owners[slot as usize] = to.clone();
        }
        state.nodes.entry(to.clone()).or_default();
    }

    /// Start migrating `slot` to `to`; the owner answers ASK for keys it
    /// does not hold
    pub fn begin_migration(&self, slot: u16, to: &NodeAddress) {
        let mut state = self.state.lock();
        state.migrating.insert(slot, to.clone());
        state.nodes.entry(to.clone()).or_default();
    }

    pub fn set_reachable(&self, address: &NodeAddress, reachable: bool) {
        let mut state = self.state.lock();
        if reachable {
            state.unreachable.remove(address);
        } else {
            state.unreachable.insert(address.clone());
        }
    }

    /// Make `CLUSTER SLOTS` fail on a node while commands still work
    pub fn set_slots_available(&self, address: &NodeAddress, available: bool) {
        let mut state = self.state.lock();
        if available {
            state.slots_unavailable.remove(address);
        } else {
            state.slots_unavailable.insert(address.clone());
        }
    }

    /// Queue a canned reply for the next command sent to `address`
    pub fn push_reply(&self, address: &NodeAddress, reply: Result<Reply, NodeError>) {
        self.state
            .lock()
            .scripted
            .entry(address.clone())
            .or_default()
            .push_back(reply);
    }

    /// Delay every command and `CLUSTER SLOTS` call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    pub fn owner_of(&self, slot: u16) -> NodeAddress {
        self.state.lock().owners[slot as usize].clone()
    }

    /// Value stored under `key` on any node
    pub fn value(&self, key: &[u8]) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.nodes.values().find_map(|node| node.data.get(key).cloned())
    }

    /// Value stored under `key` on one node
    pub fn value_on(&self, address: &NodeAddress, key: &[u8]) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.nodes.get(address)?.data.get(key).cloned()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn open_connections(&self) -> usize {
        let state = self.state.lock();
        state.connects - state.closes
    }

    pub fn cluster_slots_calls(&self) -> usize {
        self.state.lock().cluster_slots_calls
    }

    pub fn commands_on(&self, address: &NodeAddress) -> u64 {
        self.state
            .lock()
            .nodes
            .get(address)
            .map_or(0, |node| node.commands)
    }

    pub fn asking_commands(&self) -> usize {
        self.state.lock().asking_commands
    }

    fn cluster_slots_reply(state: &ClusterState) -> Reply {
        let mut entries = Vec::new();
        let mut start = 0usize;
        for slot in 1..=SLOT_COUNT as usize {
            let boundary =
                slot == SLOT_COUNT as usize || state.owners[slot] != state.owners[start];
            if boundary {
                let owner = &state.owners[start];
                entries.push(Reply::Array(vec![
                    Reply::Int(start as i64),
                    Reply::Int(slot as i64 - 1),
                    Reply::Array(vec![
                        Reply::Bulk(owner.host.as_bytes().to_vec()),
                        Reply::Int(i64::from(owner.port)),
                        Reply::Bulk(format!("node-{}", owner.port).into_bytes()),
                    ]),
                ]));
                start = slot;
            }
        }
        Reply::Array(entries)
    }

    fn handle(&self, address: &NodeAddress, command: &Command, asking: bool) -> Result<Reply, NodeError> {
        let mut state = self.state.lock();

        if let Some(reply) = state.scripted.get_mut(address).and_then(VecDeque::pop_front) {
            return reply;
        }
        if state.unreachable.contains(address) {
            return Err(NodeError::Io(format!("connection to {} reset", address)));
        }
        if asking {
            state.asking_commands += 1;
        }

        let slot = command.slot();
        let owner = state.owners[slot as usize].clone();
        let importing = state.migrating.get(&slot).cloned();

        let serves = if &owner == address {
            let holds_key = state
                .nodes
                .get(address)
                .is_some_and(|node| node.data.contains_key(command.key()));
            match importing {
                Some(target) if !holds_key => {
                    return Err(NodeError::Redirect(Redirect::Ask { slot, target }));
                }
                _ => true,
            }
        } else {
            asking && importing.as_ref() == Some(address)
        };

        if !serves {
            return Err(NodeError::Redirect(Redirect::Moved {
                slot,
                target: owner,
            }));
        }

        let node = state.nodes.entry(address.clone()).or_default();
        node.commands += 1;
        match command.name().to_ascii_uppercase().as_str() {
            "SET" => {
                let value = command
                    .args()
                    .first()
                    .cloned()
                    .ok_or_else(|| NodeError::Server("ERR wrong number of arguments".into()))?;
                node.data.insert(command.key().to_vec(), value);
                Ok(Reply::ok())
            }
            "GET" => Ok(node
                .data
                .get(command.key())
                .cloned()
                .map_or(Reply::Nil, Reply::Bulk)),
            "DEL" => Ok(Reply::Int(i64::from(
                node.data.remove(command.key()).is_some(),
            ))),
            other => Err(NodeError::Server(format!("ERR unknown command '{}'", other))),
        }
    }
}

struct MemoryConnector {
    cluster: MemoryCluster,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &NodeAddress,
        _timeout: Duration,
    ) -> Result<Arc<dyn NodeConnection>, NodeError> {
        let mut state = self.cluster.state.lock();
        if !state.nodes.contains_key(address) || state.unreachable.contains(address) {
            return Err(NodeError::Io(format!("connection to {} refused", address)));
        }
        state.connects += 1;
        drop(state);

        Ok(Arc::new(MemoryNode {
            address: address.clone(),
            cluster: self.cluster.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryNode {
    address: NodeAddress,
    cluster: MemoryCluster,
    closed: AtomicBool,
}

impl MemoryNode {
    async fn delay(&self) {
        let latency = self.cluster.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl NodeConnection for MemoryNode {
    fn address(&self) -> &NodeAddress {
        &self.address
    }

    async fn execute(&self, command: &Command, asking: bool) -> Result<Reply, NodeError> {
        self.delay().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(NodeError::Io(format!("connection to {} closed", self.address)));
        }
        self.cluster.handle(&self.address, command, asking)
    }

    async fn cluster_slots(&self) -> Result<Reply, NodeError> {
        self.delay().await;
        let mut state = self.cluster.state.lock();
        state.cluster_slots_calls += 1;
        if state.unreachable.contains(&self.address)
            || state.slots_unavailable.contains(&self.address)
        {
            return Err(NodeError::Io(format!(
                "CLUSTER SLOTS on {} failed",
                self.address
            )));
        }
        Ok(MemoryCluster::cluster_slots_reply(&state))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cluster.state.lock().closes += 1;
        }
    }
}
