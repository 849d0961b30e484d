//! The NUMA topology of the machine: which nodes exist, what each node provides
//! (memory, CPUs, persistent memory), how far apart nodes are,
//! and a lazily-built table that maps each memory-only node to a nearby CPU.
//!
//! A [`Topology`] is immutable once built, except for its nearest-CPU table,
//! which is built on first use and can be explicitly invalidated
//! (e.g., after a CPU or node hotplug event) so that the next lookup rebuilds it.
//!
//! The table is owned by the `Topology` instance, not held in a global.
//! A machine builds one `Topology` and hands out clones of an `Arc` to it,
//! so every user of that machine sees, and invalidates, the same table.
//! Two separately built `Topology` values each have their own table.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate bitflags;
extern crate derive_more;
extern crate kernel_config;


mod mask;
mod nearest;

pub use mask::NodeMask;
pub use nearest::NearestCpuTable;

use alloc::{sync::Arc, vec::Vec};
use core::fmt;
use bitflags::bitflags;
use derive_more::{Display, From, Into};
use kernel_config::memory::{LOCAL_DISTANCE, MAX_NUMNODES, REMOTE_DISTANCE};
use spin::RwLock;


/// The identifier of a NUMA node, in the range `0..MAX_NUMNODES`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn new(id: usize) -> NodeId {
        NodeId(id)
    }

    pub const fn value(self) -> usize {
        self.0
    }

    /// Converts a raw node number, as supplied by a caller, into a `NodeId`.
    ///
    /// Returns `None` if the number cannot name any node,
    /// i.e., it is negative or not below [`MAX_NUMNODES`].
    /// This does not check whether the node actually exists.
    pub fn from_raw(raw: i32) -> Option<NodeId> {
        if raw < 0 || raw as usize >= MAX_NUMNODES {
            None
        } else {
            Some(NodeId(raw as usize))
        }
    }

    /// Returns this node as the raw integer reported in status arrays.
    pub const fn as_raw(self) -> i32 {
        self.0 as i32
    }
}

/// The identifier of a logical CPU.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct CpuId(u32);

impl CpuId {
    pub const fn new(id: u32) -> CpuId {
        CpuId(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

bitflags! {
    /// What a NUMA node provides.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NodeStates: u8 {
        /// The node is online.
        const ONLINE = 1 << 0;
        /// The node has memory that pages can be allocated from.
        const MEMORY = 1 << 1;
        /// The node has at least one CPU.
        const CPU    = 1 << 2;
        /// The node's memory is persistent memory.
        /// Such nodes have no CPUs of their own.
        const PMEM   = 1 << 3;
    }
}

/// A single NUMA node.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    id: NodeId,
    states: NodeStates,
    cpus: Vec<CpuId>,
}

impl NodeInfo {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn states(&self) -> NodeStates {
        self.states
    }

    pub fn cpus(&self) -> &[CpuId] {
        &self.cpus
    }

    /// Returns `true` if this is a memory-only (persistent memory) node.
    pub fn is_pmem(&self) -> bool {
        self.states.contains(NodeStates::PMEM)
    }
}


/// The NUMA topology: the set of nodes and the distances between them.
pub struct Topology {
    nodes: Vec<NodeInfo>,
    /// Row-major `nodes.len() x nodes.len()` distance matrix.
    distances: Vec<u8>,
    nearest_cpu: RwLock<Option<Arc<NearestCpuTable>>>,
}

impl Topology {
    /// Returns a builder for describing a topology node by node.
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// A topology of `nr_nodes` identical nodes, each with memory and `cpus_per_node` CPUs.
    /// CPUs are numbered consecutively across nodes.
    pub fn uniform(nr_nodes: usize, cpus_per_node: u32) -> Result<Topology, &'static str> {
        let mut builder = Topology::builder();
        let mut next_cpu = 0;
        for id in 0..nr_nodes {
            let cpus: Vec<u32> = (next_cpu .. next_cpu + cpus_per_node).collect();
            next_cpu += cpus_per_node;
            builder = builder.node(id, NodeStates::MEMORY, &cpus);
        }
        builder.build()
    }

    pub fn nr_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(id.value())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.iter()
    }

    /// Returns `true` if the given node exists and has all of the given `states`.
    pub fn node_has_state(&self, id: NodeId, states: NodeStates) -> bool {
        self.node(id).map_or(false, |n| n.states.contains(states))
    }

    /// Returns the distance between two nodes,
    /// or `u8::MAX` if either node does not exist.
    pub fn distance(&self, from: NodeId, to: NodeId) -> u8 {
        let n = self.nodes.len();
        if from.value() >= n || to.value() >= n {
            return u8::MAX;
        }
        self.distances[from.value() * n + to.value()]
    }

    /// The set of all nodes that have memory.
    pub fn memory_nodes(&self) -> NodeMask {
        self.nodes.iter()
            .filter(|n| n.states.contains(NodeStates::MEMORY))
            .map(|n| n.id)
            .collect()
    }

    /// Returns the node that the given CPU belongs to.
    pub fn cpu_to_node(&self, cpu: CpuId) -> Option<NodeId> {
        self.nodes.iter()
            .find(|n| n.cpus.contains(&cpu))
            .map(|n| n.id)
    }

    /// Returns the nearest-CPU table, building it if this is the first use
    /// since the topology was created or last invalidated.
    pub fn nearest_cpu_table(&self) -> Arc<NearestCpuTable> {
        if let Some(table) = self.nearest_cpu.read().as_ref() {
            return table.clone();
        }
        let mut slot = self.nearest_cpu.write();
        // another thread may have built it while we waited for the write lock
        if let Some(table) = slot.as_ref() {
            return table.clone();
        }
        let table = Arc::new(NearestCpuTable::build(self));
        debug!("built nearest-CPU table for {} nodes: {:?}", self.nodes.len(), table);
        *slot = Some(table.clone());
        table
    }

    /// Returns the CPU nearest to the given memory-only node,
    /// or `None` if the node is not a memory-only node or no CPU node exists.
    pub fn nearest_cpu(&self, node: NodeId) -> Option<CpuId> {
        self.nearest_cpu_table().get(node)
    }

    /// Discards the nearest-CPU table so that the next lookup rebuilds it.
    pub fn invalidate_nearest_cpu_table(&self) {
        if self.nearest_cpu.write().take().is_some() {
            debug!("invalidated nearest-CPU table");
        }
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Topology")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}


/// Describes a [`Topology`] before it is built.
#[derive(Default)]
pub struct TopologyBuilder {
    nodes: Vec<NodeInfo>,
    distances: Vec<(usize, usize, u8)>,
}

impl TopologyBuilder {
    /// Adds a node with the given states and CPUs.
    ///
    /// `ONLINE` is always set, `CPU` is set if `cpus` is non-empty,
    /// and `PMEM` implies `MEMORY`.
    pub fn node(mut self, id: usize, states: NodeStates, cpus: &[u32]) -> TopologyBuilder {
        let mut states = states | NodeStates::ONLINE;
        if !cpus.is_empty() {
            states |= NodeStates::CPU;
        }
        if states.contains(NodeStates::PMEM) {
            states |= NodeStates::MEMORY;
        }
        self.nodes.push(NodeInfo {
            id: NodeId(id),
            states,
            cpus: cpus.iter().copied().map(CpuId).collect(),
        });
        self
    }

    /// Sets the (symmetric) distance between two distinct nodes.
    /// Pairs that are never set default to [`REMOTE_DISTANCE`].
    pub fn distance(mut self, a: usize, b: usize, distance: u8) -> TopologyBuilder {
        self.distances.push((a, b, distance));
        self
    }

    pub fn build(mut self) -> Result<Topology, &'static str> {
        if self.nodes.is_empty() {
            return Err("a topology must have at least one node");
        }
        if self.nodes.len() > MAX_NUMNODES {
            return Err("too many nodes: the limit is MAX_NUMNODES");
        }
        self.nodes.sort_by_key(|n| n.id);
        if self.nodes.iter().enumerate().any(|(i, n)| n.id.value() != i) {
            return Err("node identifiers must be unique and dense, starting at 0");
        }
        let mut all_cpus: Vec<CpuId> = self.nodes.iter().flat_map(|n| n.cpus.iter().copied()).collect();
        let total_cpus = all_cpus.len();
        all_cpus.sort();
        all_cpus.dedup();
        if all_cpus.len() != total_cpus {
            return Err("a CPU may belong to only one node");
        }
        if self.nodes.iter().any(|n| n.is_pmem() && !n.cpus.is_empty()) {
            return Err("a persistent memory node cannot have CPUs");
        }

        let n = self.nodes.len();
        let mut distances = Vec::with_capacity(n * n);
        for from in 0..n {
            for to in 0..n {
                distances.push(if from == to { LOCAL_DISTANCE } else { REMOTE_DISTANCE });
            }
        }
        for (a, b, d) in self.distances {
            if a >= n || b >= n {
                return Err("distance given for a node that does not exist");
            }
            if a == b {
                return Err("the distance from a node to itself is fixed");
            }
            if d <= LOCAL_DISTANCE {
                return Err("the distance between distinct nodes must exceed LOCAL_DISTANCE");
            }
            distances[a * n + b] = d;
            distances[b * n + a] = d;
        }

        Ok(Topology {
            nodes: self.nodes,
            distances,
            nearest_cpu: RwLock::new(None),
        })
    }
}
