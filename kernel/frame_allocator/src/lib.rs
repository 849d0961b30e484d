//! Allocates destination frames on a chosen NUMA node.
//!
//! The migration engine only needs two operations from its allocator:
//! get a new frame on a given node, and give back a frame that is no longer used
//! (either a source frame whose last reference was dropped, or a destination frame
//! that was never exposed because its migration failed).
//! Those are expressed by the [`FrameAllocator`] trait, along with a query of how much
//! room is left on a node, which misplaced-page migration checks before it starts.
//!
//! [`NodeFrameAllocator`] is a simple per-node pool with a fixed capacity per node.
//! It can also be told to start failing after a given number of allocations,
//! which is how allocation exhaustion in the middle of a migration pass is exercised.

#![no_std]

extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate kernel_config;
extern crate numa_topology;
extern crate memory;

#[cfg(test)]
mod test;

use alloc::{sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use memory::{Frame, PageFlags, Pfn};
use numa_topology::NodeId;
use spin::Mutex;

/// The first frame number handed out, so that frame number 0 is never valid.
const FIRST_PFN: usize = 0x1000;

/// Hands out and takes back frames on specific nodes.
pub trait FrameAllocator: Send + Sync {
    /// Allocates a zeroed unit of `nr_pages` frames on `node`,
    /// returned with one reference held by the caller.
    /// Returns `None` if the node has no room.
    fn allocate_frame(&self, node: NodeId, nr_pages: usize) -> Option<Arc<Frame>>;

    /// Takes back a frame that nobody uses anymore.
    ///
    /// The frame must have no references left, or only the one it was allocated with.
    fn free_frame(&self, frame: Arc<Frame>);

    /// The number of base frames that can still be allocated on `node`.
    fn free_pages(&self, node: NodeId) -> usize;
}

/// The bookkeeping for one node's frames.
#[derive(Debug, Default)]
struct FramePool {
    /// Total frames on this node.
    capacity: usize,
    /// Frames currently allocated.
    allocated: usize,
    /// If set, the number of allocations that may still succeed before the pool
    /// pretends to be exhausted.
    fail_after: Option<usize>,
}

/// A frame allocator with a fixed number of frames per node.
pub struct NodeFrameAllocator {
    pools: Vec<Mutex<FramePool>>,
    next_pfn: AtomicUsize,
}

impl NodeFrameAllocator {
    /// Creates an allocator with `capacities[n]` frames on node `n`.
    pub fn new(capacities: &[usize]) -> Result<NodeFrameAllocator, &'static str> {
        if capacities.is_empty() {
            return Err("an allocator needs at least one node");
        }
        Ok(NodeFrameAllocator {
            pools: capacities.iter()
                .map(|&capacity| Mutex::new(FramePool { capacity, ..Default::default() }))
                .collect(),
            next_pfn: AtomicUsize::new(FIRST_PFN),
        })
    }

    fn pool(&self, node: NodeId) -> Option<&Mutex<FramePool>> {
        self.pools.get(node.value())
    }

    /// The number of frames currently allocated on `node`.
    pub fn allocated_pages(&self, node: NodeId) -> usize {
        self.pool(node).map_or(0, |p| p.lock().allocated)
    }

    /// Lets only `allocations` more allocations on `node` succeed;
    /// every allocation after those fails as if the node were full.
    pub fn fail_after(&self, node: NodeId, allocations: usize) {
        if let Some(pool) = self.pool(node) {
            pool.lock().fail_after = Some(allocations);
        }
    }

    /// Undoes every [`fail_after()`](Self::fail_after).
    pub fn clear_failures(&self) {
        for pool in &self.pools {
            pool.lock().fail_after = None;
        }
    }
}

impl FrameAllocator for NodeFrameAllocator {
    fn allocate_frame(&self, node: NodeId, nr_pages: usize) -> Option<Arc<Frame>> {
        let nr_pages = nr_pages.max(1);
        let mut pool = self.pool(node)?.lock();
        if let Some(remaining) = pool.fail_after.as_mut() {
            if *remaining == 0 {
                debug!("allocation of {} frames on node {} failed (injected)", nr_pages, node);
                return None;
            }
            *remaining -= 1;
        }
        if pool.capacity - pool.allocated < nr_pages {
            debug!("allocation of {} frames on node {} failed: node is full", nr_pages, node);
            return None;
        }
        pool.allocated += nr_pages;
        drop(pool);

        let pfn = self.next_pfn.fetch_add(nr_pages, Ordering::Relaxed);
        let frame = Arc::new(Frame::new(Pfn::new(pfn), node, nr_pages));
        trace!("allocated {:?}", frame);
        Some(frame)
    }

    fn free_frame(&self, frame: Arc<Frame>) {
        match frame.ref_count() {
            0 => { }
            1 => { frame.put(); }
            refs => {
                error!("BUG: freeing {:?}, which still has {} references", frame, refs);
                return;
            }
        }
        let Some(pool) = self.pool(frame.node()) else {
            error!("BUG: freeing {:?}, which belongs to a nonexistent node", frame);
            return;
        };
        let mut pool = pool.lock();
        match pool.allocated.checked_sub(frame.nr_pages()) {
            Some(allocated) => pool.allocated = allocated,
            None => error!("BUG: freeing {:?} would underflow node {}'s allocation count", frame, frame.node()),
        }
        drop(pool);

        frame.clear_owner();
        frame.clear_flags(PageFlags::all());
        trace!("freed {:?}", frame);
    }

    fn free_pages(&self, node: NodeId) -> usize {
        self.pool(node).map_or(0, |p| {
            let pool = p.lock();
            pool.capacity - pool.allocated
        })
    }
}
