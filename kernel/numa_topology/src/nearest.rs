use alloc::{vec, vec::Vec};
use core::fmt;
use crate::{CpuId, NodeId, NodeStates, Topology};

/// For every memory-only (persistent memory) node, the CPU of the closest node that has CPUs.
///
/// Writing to persistent memory from a remote socket is expensive,
/// so copies into such a node are best performed by a CPU on the closest socket.
/// Entries for nodes that are not memory-only are `None`.
pub struct NearestCpuTable {
    entries: Vec<Option<CpuId>>,
}

impl NearestCpuTable {
    pub(crate) fn build(topology: &Topology) -> NearestCpuTable {
        let nr_nodes = topology.nr_nodes();

        // Each CPU node is represented by one of its CPUs; the last one listed wins.
        let mut node_to_cpu: Vec<Option<CpuId>> = vec![None; nr_nodes];
        for node in topology.nodes() {
            if let Some(cpu) = node.cpus().last() {
                node_to_cpu[node.id().value()] = Some(*cpu);
            }
        }

        let mut entries = vec![None; nr_nodes];
        for node in topology.nodes() {
            if !node.states().contains(NodeStates::PMEM) {
                continue;
            }
            let mut min_distance = u16::MAX;
            for (cpu_node, cpu) in node_to_cpu.iter().enumerate() {
                let Some(cpu) = cpu else { continue };
                let distance = topology.distance(node.id(), NodeId::new(cpu_node)) as u16;
                if distance < min_distance {
                    min_distance = distance;
                    entries[node.id().value()] = Some(*cpu);
                }
            }
            if entries[node.id().value()].is_none() {
                warn!("memory-only node {} has no CPU node to pair with", node.id());
            }
        }

        NearestCpuTable { entries }
    }

    /// Returns the nearest CPU for the given node, if it is a memory-only node.
    pub fn get(&self, node: NodeId) -> Option<CpuId> {
        self.entries.get(node.value()).copied().flatten()
    }
}

impl fmt::Debug for NearestCpuTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().enumerate().filter_map(|(n, c)| c.map(|c| (n, c.value()))))
            .finish()
    }
}
