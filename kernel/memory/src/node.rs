use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicIsize, Ordering};
use numa_topology::{NodeId, Topology};
use spin::Mutex;
use crate::{Frame, PageFlags, Pfn};

/// Per-node page-state counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatItem {
    /// Anonymous pages isolated from the LRU for migration.
    IsolatedAnon,
    /// File pages isolated from the LRU for migration.
    IsolatedFile,
    /// Pages in a page cache.
    FilePages,
    /// Swap-backed pages in a page cache.
    Shmem,
    /// Dirty page-cache pages of mappings that account dirty pages.
    FileDirty,
}

const NR_NODE_STAT_ITEMS: usize = 5;

impl NodeStatItem {
    fn index(self) -> usize {
        match self {
            NodeStatItem::IsolatedAnon => 0,
            NodeStatItem::IsolatedFile => 1,
            NodeStatItem::FilePages => 2,
            NodeStatItem::Shmem => 3,
            NodeStatItem::FileDirty => 4,
        }
    }
}

/// The LRU list and counters of one node.
pub struct NodeMemory {
    id: NodeId,
    lru: Mutex<BTreeMap<Pfn, Arc<Frame>>>,
    stats: [AtomicIsize; NR_NODE_STAT_ITEMS],
}

impl NodeMemory {
    fn new(id: NodeId) -> NodeMemory {
        NodeMemory {
            id,
            lru: Mutex::new(BTreeMap::new()),
            stats: Default::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self, item: NodeStatItem) -> isize {
        self.stats[item.index()].load(Ordering::Acquire)
    }

    pub fn lru_len(&self) -> usize {
        self.lru.lock().len()
    }

    pub fn lru_contains(&self, frame: &Frame) -> bool {
        self.lru.lock().contains_key(&frame.pfn())
    }
}


/// The per-node LRU lists and counters of every node.
pub struct MemoryNodes {
    nodes: Vec<NodeMemory>,
}

impl MemoryNodes {
    pub fn new(nr_nodes: usize) -> MemoryNodes {
        MemoryNodes {
            nodes: (0..nr_nodes).map(|n| NodeMemory::new(NodeId::new(n))).collect(),
        }
    }

    pub fn for_topology(topology: &Topology) -> MemoryNodes {
        MemoryNodes::new(topology.nr_nodes())
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeMemory> {
        self.nodes.get(id.value())
    }

    pub fn mod_state(&self, node: NodeId, item: NodeStatItem, delta: isize) {
        match self.node(node) {
            Some(n) => { n.stats[item.index()].fetch_add(delta, Ordering::AcqRel); }
            None => error!("BUG: accounting {:?} on nonexistent node {}", item, node),
        }
    }

    pub fn state(&self, node: NodeId, item: NodeStatItem) -> isize {
        self.node(node).map_or(0, |n| n.state(item))
    }

    /// The number of pages on `node` currently isolated for migration.
    pub fn nr_isolated(&self, node: NodeId) -> isize {
        self.state(node, NodeStatItem::IsolatedAnon) + self.state(node, NodeStatItem::IsolatedFile)
    }

    fn isolated_item(frame: &Frame) -> NodeStatItem {
        if frame.is_file_cache() { NodeStatItem::IsolatedFile } else { NodeStatItem::IsolatedAnon }
    }

    /// Counts `frame` as isolated for migration on its node.
    pub fn inc_isolated(&self, frame: &Frame) {
        self.mod_state(frame.node(), Self::isolated_item(frame), frame.nr_pages() as isize);
    }

    /// Stops counting `frame` as isolated for migration on its node.
    pub fn dec_isolated(&self, frame: &Frame) {
        self.mod_state(frame.node(), Self::isolated_item(frame), -(frame.nr_pages() as isize));
    }

    /// Adds `frame` to its node's LRU list. The list does not hold a reference.
    pub fn lru_add(&self, frame: &Arc<Frame>) {
        let Some(node) = self.node(frame.node()) else {
            error!("BUG: {:?} belongs to a nonexistent node", frame);
            return;
        };
        frame.set_flags(PageFlags::LRU);
        node.lru.lock().insert(frame.pfn(), frame.clone());
    }

    /// Takes `frame` off its LRU list so that nobody else (e.g., reclaim) can take it,
    /// and takes a reference on it for the caller.
    ///
    /// Fails if the frame is not on an LRU list, e.g., because it is already isolated.
    pub fn isolate_lru_page(&self, frame: &Arc<Frame>) -> Result<(), &'static str> {
        let node = self.node(frame.node()).ok_or("frame belongs to a nonexistent node")?;
        let mut lru = node.lru.lock();
        if !frame.test_and_clear_flags(PageFlags::LRU) {
            return Err("frame is not on an LRU list");
        }
        lru.remove(&frame.pfn());
        frame.get();
        Ok(())
    }

    /// Puts an isolated `frame` back on its LRU list and drops the caller's reference.
    ///
    /// Returns `true` if that was the last reference, in which case the frame has been
    /// taken back off the list and the caller must release it to its allocator.
    pub fn putback_lru_page(&self, frame: &Arc<Frame>) -> bool {
        self.lru_add(frame);
        if frame.put() {
            self.lru_del(frame);
            true
        } else {
            false
        }
    }

    /// Removes `frame` from its LRU list, if it is on one.
    pub fn lru_del(&self, frame: &Frame) {
        if let Some(node) = self.node(frame.node()) {
            let mut lru = node.lru.lock();
            if frame.test_and_clear_flags(PageFlags::LRU) {
                lru.remove(&frame.pfn());
            }
        }
    }

    /// Marks `frame` dirty, accounting it if its mapping tracks dirty pages.
    pub fn set_page_dirty(&self, frame: &Frame) {
        if frame.test_and_set_flags(PageFlags::DIRTY) {
            return;
        }
        if let Some(mapping) = frame.mapping() {
            if mapping.account_dirty() {
                self.mod_state(frame.node(), NodeStatItem::FileDirty, frame.nr_pages() as isize);
            }
        }
    }
}
