use core::fmt;
use kernel_config::memory::MAX_NUMNODES;
use crate::NodeId;

/// A set of NUMA nodes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeMask(u64);

impl NodeMask {
    pub const fn empty() -> NodeMask {
        NodeMask(0)
    }

    /// A mask containing every node that can exist.
    pub const fn all() -> NodeMask {
        NodeMask(u64::MAX)
    }

    pub fn insert(&mut self, node: NodeId) {
        if node.value() < MAX_NUMNODES {
            self.0 |= 1 << node.value();
        }
    }

    pub fn remove(&mut self, node: NodeId) {
        if node.value() < MAX_NUMNODES {
            self.0 &= !(1 << node.value());
        }
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.value() < MAX_NUMNODES && self.0 & (1 << node.value()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the nodes in this mask in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..MAX_NUMNODES)
            .filter(move |i| self.0 & (1 << i) != 0)
            .map(NodeId::new)
    }
}

impl FromIterator<NodeId> for NodeMask {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> NodeMask {
        let mut mask = NodeMask::empty();
        for node in iter {
            mask.insert(node);
        }
        mask
    }
}

impl fmt::Debug for NodeMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|n| n.value())).finish()
    }
}
