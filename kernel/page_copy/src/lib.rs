//! The copy engine used by page migration.
//!
//! A migration copies two things from each source frame to its destination frame:
//! the content, and the secondary state (access bits, dirtiness, cgroup charge,
//! page owner tag, and so on; see [`migrate_page_states()`]).
//!
//! Content is copied by one of three backends:
//! * [`PlainCopy`]: a sequential copy on the calling thread.
//! * [`MultiThreadCopy`]: a rayon worker pool that splits each unit into chunks.
//!   Pools are created per worker node, so that copies into a memory-only node
//!   can be performed by CPUs close to it.
//! * [`DmaChannel`]: an offload channel, served by a dedicated worker thread,
//!   that copies each unit one page-sized descriptor at a time.
//!
//! If an accelerated backend fails to copy a unit, that unit alone is copied again
//! with the plain backend. Units larger than [`MAX_ORDER_NR_PAGES`] are copied
//! one constituent frame at a time.
//!
//! Worker threads only exist inside a copy call: the engine joins them
//! (by waiting for every unit's result) before returning.

#[macro_use] extern crate log;
extern crate spin;
extern crate bitflags;
extern crate rayon;
extern crate crossbeam_channel;
extern crate kernel_config;
extern crate numa_topology;
extern crate memory;


mod backend;
mod dma;
mod mt;
mod states;

pub use backend::{CopyBackend, CopyError, CopyUnit, FaultInjector, PlainCopy};
pub use dma::DmaChannel;
pub use mt::MultiThreadCopy;
pub use states::migrate_page_states;

use std::sync::{
    atomic::{AtomicIsize, AtomicUsize, Ordering},
    Arc,
};
use bitflags::bitflags;
use kernel_config::memory::MAX_ORDER_NR_PAGES;
use memory::Frame;
use numa_topology::{NodeId, NodeStates, Topology};

bitflags! {
    /// Which copy backend a caller asks for.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CopyMode: u8 {
        /// Use the multi-threaded backend. Takes priority over `DMA`.
        const MT                 = 1 << 0;
        /// Use the DMA offload channel.
        const DMA                = 1 << 1;
        /// When copying into a memory-only node, run copy workers on the CPU node
        /// nearest to it, and always use the multi-threaded backend for huge units.
        const AVOID_REMOTE_WRITE = 1 << 2;
    }
}

/// A (destination, source) pair of frames of the same size.
#[derive(Clone, Debug)]
pub struct CopyPair {
    pub dst: Arc<Frame>,
    pub src: Arc<Frame>,
}

impl CopyPair {
    pub fn new(dst: Arc<Frame>, src: Arc<Frame>) -> CopyPair {
        CopyPair { dst, src }
    }
}

/// A snapshot of the engine's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CopyCounters {
    pub plain_units: usize,
    pub mt_units: usize,
    pub dma_units: usize,
    /// Units that an accelerated backend failed to copy and the plain backend copied instead.
    pub fallbacks: usize,
    /// The node whose CPUs ran the most recent multi-threaded copy, if it was pinned to one.
    pub last_worker_node: Option<NodeId>,
}

#[derive(Default)]
struct Counters {
    plain_units: AtomicUsize,
    mt_units: AtomicUsize,
    dma_units: AtomicUsize,
    fallbacks: AtomicUsize,
    last_worker_node: AtomicIsize,
}

/// Selects a backend for each copy request and falls back to the plain backend per unit.
pub struct CopyEngine {
    topology: Arc<Topology>,
    plain: PlainCopy,
    mt: MultiThreadCopy,
    dma: DmaChannel,
    faults: Arc<FaultInjector>,
    counters: Counters,
}

impl CopyEngine {
    /// Creates an engine whose multi-threaded backend uses `threads` workers per pool,
    /// and starts its DMA channel.
    pub fn new(topology: Arc<Topology>, threads: usize) -> Result<CopyEngine, &'static str> {
        let faults = Arc::new(FaultInjector::default());
        Ok(CopyEngine {
            topology,
            plain: PlainCopy,
            mt: MultiThreadCopy::new(threads, faults.clone())?,
            dma: DmaChannel::start(faults.clone())?,
            faults,
            counters: Counters { last_worker_node: AtomicIsize::new(-1), ..Default::default() },
        })
    }

    /// The fault injector shared by the accelerated backends.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn counters(&self) -> CopyCounters {
        let last = self.counters.last_worker_node.load(Ordering::Relaxed);
        CopyCounters {
            plain_units: self.counters.plain_units.load(Ordering::Relaxed),
            mt_units: self.counters.mt_units.load(Ordering::Relaxed),
            dma_units: self.counters.dma_units.load(Ordering::Relaxed),
            fallbacks: self.counters.fallbacks.load(Ordering::Relaxed),
            last_worker_node: usize::try_from(last).ok().map(NodeId::new),
        }
    }

    /// Copies the content and state of one frame.
    pub fn copy_page(&self, dst: &Arc<Frame>, src: &Arc<Frame>, mode: CopyMode) {
        self.copy_page_lists(&[CopyPair::new(dst.clone(), src.clone())], mode);
    }

    /// Copies the content and state of every pair in one call.
    ///
    /// Every pair ends up copied: units that the selected backend fails to copy
    /// are copied by the plain backend instead.
    pub fn copy_page_lists(&self, pairs: &[CopyPair], mode: CopyMode) {
        if pairs.is_empty() {
            return;
        }
        self.copy_content(pairs, mode);
        for pair in pairs {
            migrate_page_states(&pair.dst, &pair.src);
        }
    }

    /// Copies only the content of every pair, without the state carryover.
    pub fn copy_content(&self, pairs: &[CopyPair], mode: CopyMode) {
        let units = split_into_units(pairs);
        let mode = self.effective_mode(pairs, mode);

        let (backend, counter): (&dyn CopyBackend, &AtomicUsize) = if mode.contains(CopyMode::MT) {
            (&self.mt, &self.counters.mt_units)
        } else if mode.contains(CopyMode::DMA) {
            (&self.dma, &self.counters.dma_units)
        } else {
            (&self.plain, &self.counters.plain_units)
        };

        let worker_node = if mode.contains(CopyMode::MT) {
            let node = self.worker_node(&pairs[0].dst, mode);
            self.counters.last_worker_node.store(node.map_or(-1, |n| n.value() as isize), Ordering::Relaxed);
            node
        } else {
            None
        };

        let results = backend.copy_units(&units, worker_node);
        let mut copied = 0;
        for (unit, result) in units.iter().zip(results) {
            match result {
                Ok(()) => copied += 1,
                Err(e) => {
                    warn!("{} copy of {:?} -> {:?} failed ({:?}), falling back to plain copy",
                        backend.name(), unit.src.pfn(), unit.dst.pfn(), e);
                    self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                    self.counters.plain_units.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = self.plain.copy_unit(unit) {
                        error!("plain copy of {:?} -> {:?} failed: {:?}", unit.src.pfn(), unit.dst.pfn(), e);
                    }
                }
            }
        }
        counter.fetch_add(copied, Ordering::Relaxed);
        trace!("copied {} pairs ({} units) with the {} backend", pairs.len(), units.len(), backend.name());
    }

    fn effective_mode(&self, pairs: &[CopyPair], mode: CopyMode) -> CopyMode {
        if mode.contains(CopyMode::AVOID_REMOTE_WRITE)
            && pairs.iter().any(|p| p.src.is_huge() && self.is_pmem(p.dst.node()))
        {
            mode | CopyMode::MT
        } else {
            mode
        }
    }

    fn is_pmem(&self, node: NodeId) -> bool {
        self.topology.node_has_state(node, NodeStates::PMEM)
    }

    /// Chooses the node whose CPUs should copy into `dst`.
    fn worker_node(&self, dst: &Frame, mode: CopyMode) -> Option<NodeId> {
        let node = dst.node();
        if self.is_pmem(node) {
            if !mode.contains(CopyMode::AVOID_REMOTE_WRITE) {
                return None;
            }
            return self.topology.nearest_cpu(node).and_then(|cpu| self.topology.cpu_to_node(cpu));
        }
        if self.topology.node_has_state(node, NodeStates::CPU) {
            Some(node)
        } else {
            None
        }
    }
}

/// Splits pairs into copy units: one per pair,
/// or one per constituent frame for gigantic units.
fn split_into_units(pairs: &[CopyPair]) -> Vec<CopyUnit> {
    let mut units = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let nr_pages = pair.src.nr_pages();
        if nr_pages > MAX_ORDER_NR_PAGES {
            units.extend((0..nr_pages).map(|i| CopyUnit::new(pair, i, 1)));
        } else {
            units.push(CopyUnit::new(pair, 0, nr_pages));
        }
    }
    units
}
