use std::{collections::BTreeSet, ops::Range, sync::Arc};
use kernel_config::memory::PAGE_SIZE;
use memory::{Frame, Pfn};
use numa_topology::NodeId;
use spin::Mutex;
use crate::CopyPair;

/// Why a backend failed to copy a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyError {
    /// The destination is smaller than the range being copied.
    SizeMismatch,
    /// The DMA channel is gone.
    ChannelClosed,
    /// The backend could not start its workers.
    NoWorkers,
    /// A failure requested through the [`FaultInjector`].
    Injected,
}

/// A contiguous range of base frames to copy from one frame to another.
#[derive(Clone, Debug)]
pub struct CopyUnit {
    pub dst: Arc<Frame>,
    pub src: Arc<Frame>,
    /// The first base frame of the range, relative to the start of the unit.
    pub first_page: usize,
    pub nr_pages: usize,
}

impl CopyUnit {
    pub fn new(pair: &CopyPair, first_page: usize, nr_pages: usize) -> CopyUnit {
        CopyUnit {
            dst: pair.dst.clone(),
            src: pair.src.clone(),
            first_page,
            nr_pages,
        }
    }

    /// The byte range this unit covers in both frames.
    pub fn byte_range(&self) -> Range<usize> {
        self.first_page * PAGE_SIZE .. (self.first_page + self.nr_pages) * PAGE_SIZE
    }

    /// Copies `self.byte_range()` chunk by chunk with `copy`, which receives
    /// matching destination and source slices.
    pub(crate) fn copy_with(&self, copy: impl FnOnce(&mut [u8], &[u8])) -> Result<(), CopyError> {
        let range = self.byte_range();
        let src = self.src.content();
        let mut dst = self.dst.content_mut();
        let src = src.get(range.clone()).ok_or(CopyError::SizeMismatch)?;
        let dst = dst.get_mut(range).ok_or(CopyError::SizeMismatch)?;
        copy(dst, src);
        Ok(())
    }
}

/// A way of copying frame content.
pub trait CopyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Copies every unit, returning one result per unit, in order.
    ///
    /// `worker_node` is the node whose CPUs should do the copying, if the backend
    /// has a choice.
    fn copy_units(&self, units: &[CopyUnit], worker_node: Option<NodeId>) -> Vec<Result<(), CopyError>>;
}

/// A sequential copy on the calling thread.
pub struct PlainCopy;

impl PlainCopy {
    pub fn copy_unit(&self, unit: &CopyUnit) -> Result<(), CopyError> {
        unit.copy_with(|dst, src| dst.copy_from_slice(src))
    }
}

impl CopyBackend for PlainCopy {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn copy_units(&self, units: &[CopyUnit], _worker_node: Option<NodeId>) -> Vec<Result<(), CopyError>> {
        units.iter().map(|u| self.copy_unit(u)).collect()
    }
}

/// Makes the accelerated backends fail for chosen source frames,
/// to exercise the per-unit fallback to a plain copy.
#[derive(Default)]
pub struct FaultInjector {
    failing: Mutex<BTreeSet<Pfn>>,
}

impl FaultInjector {
    /// Makes every accelerated copy from the frame `pfn` fail until [`clear()`](Self::clear).
    pub fn fail_copies_from(&self, pfn: Pfn) {
        self.failing.lock().insert(pfn);
    }

    pub fn clear(&self) {
        self.failing.lock().clear();
    }

    pub fn should_fail(&self, unit: &CopyUnit) -> bool {
        self.failing.lock().contains(&unit.src.pfn())
    }
}
