use alloc::{collections::BTreeMap, sync::{Arc, Weak}, vec::Vec};
use core::{fmt, sync::atomic::{AtomicUsize, Ordering}};
use spin::{Mutex, MutexGuard};
use crate::{AddressSpace, Frame, MemoryNodes, NodeStatItem, PageFlags};

static NEXT_MAPPING_ID: AtomicUsize = AtomicUsize::new(1);

/// Why a mapping's relocation callback refused to relocate a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelocateError {
    /// The frame's private state is busy right now; retrying later may succeed.
    Again,
    /// The frame cannot be relocated in the current mode.
    Busy,
}

/// A mapping-specific relocation callback, supplied by whoever owns a [`FileMapping`]
/// (typically a filesystem that attaches buffers to its cached frames).
///
/// The migration engine still switches the page-cache slots and copies the content;
/// the callback only deals with the mapping's own private state.
pub trait RelocateFrame: Send + Sync {
    /// Called with `src` locked and unmapped, before the page cache is switched to `dst`.
    /// `may_block` is `false` when the caller must not wait for the private state.
    fn prepare(&self, src: &Frame, may_block: bool) -> Result<(), RelocateError>;

    /// Called after the page cache has been switched, to move private state
    /// (and the reference it holds) from `src` to `dst`.
    fn transfer(&self, dst: &Frame, src: &Frame);
}

/// One address-space range that maps part of a file.
struct FileMmap {
    space: Weak<AddressSpace>,
    /// First virtual page of the range.
    start: usize,
    nr_pages: usize,
    /// File page offset mapped at `start`.
    pgoff: usize,
}

/// A file's page cache, plus the reverse mapping to every address-space range that maps it.
pub struct FileMapping {
    id: usize,
    /// Page-cache slots by file page offset.
    /// A huge unit occupies `nr_pages` consecutive slots, all pointing at the same frame.
    pages: Mutex<BTreeMap<usize, Arc<Frame>>>,
    mmaps: Mutex<Vec<FileMmap>>,
    relocate: Option<Arc<dyn RelocateFrame>>,
    account_dirty: bool,
    writeouts: AtomicUsize,
}

impl FileMapping {
    /// Creates an empty mapping.
    ///
    /// `account_dirty` selects whether dirty frames of this mapping are counted
    /// in their node's [`NodeStatItem::FileDirty`] counter.
    pub fn new(relocate: Option<Arc<dyn RelocateFrame>>, account_dirty: bool) -> Arc<FileMapping> {
        Arc::new(FileMapping {
            id: NEXT_MAPPING_ID.fetch_add(1, Ordering::Relaxed),
            pages: Mutex::new(BTreeMap::new()),
            mmaps: Mutex::new(Vec::new()),
            relocate,
            account_dirty,
            writeouts: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn relocate_ops(&self) -> Option<&Arc<dyn RelocateFrame>> {
        self.relocate.as_ref()
    }

    pub fn account_dirty(&self) -> bool {
        self.account_dirty
    }

    /// Inserts `frame` into the page cache at file page offset `index`.
    ///
    /// Each page-cache slot takes a reference on the frame.
    pub fn add_frame(self: &Arc<Self>, frame: &Arc<Frame>, index: usize, nodes: &MemoryNodes) -> Result<(), &'static str> {
        let nr_pages = frame.nr_pages();
        let mut pages = self.pages.lock();
        if pages.range(index .. index + nr_pages).next().is_some() {
            return Err("page-cache slot is already occupied");
        }
        if !matches!(frame.owner(), crate::FrameOwner::None) {
            return Err("frame is already owned");
        }
        frame.set_file(self, index);
        for i in 0..nr_pages {
            pages.insert(index + i, frame.clone());
        }
        frame.ref_add(nr_pages);
        drop(pages);

        let delta = nr_pages as isize;
        nodes.mod_state(frame.node(), NodeStatItem::FilePages, delta);
        if frame.is_swapbacked() {
            nodes.mod_state(frame.node(), NodeStatItem::Shmem, delta);
        }
        if frame.is_dirty() && self.account_dirty {
            nodes.mod_state(frame.node(), NodeStatItem::FileDirty, delta);
        }
        Ok(())
    }

    /// Returns the frame cached at the given file page offset.
    pub fn find_frame(&self, index: usize) -> Option<Arc<Frame>> {
        self.pages.lock().get(&index).cloned()
    }

    /// Locks the page-cache slots, e.g., to switch them from one frame to another.
    pub fn lock_pages(&self) -> MutexGuard<'_, BTreeMap<usize, Arc<Frame>>> {
        self.pages.lock()
    }

    /// Writes a dirty frame back to the file, leaving it clean.
    /// Returns `false` if the frame was already clean.
    pub fn writepage(&self, frame: &Frame, nodes: &MemoryNodes) -> bool {
        if !frame.test_and_clear_flags(PageFlags::DIRTY) {
            return false;
        }
        if self.account_dirty {
            nodes.mod_state(frame.node(), NodeStatItem::FileDirty, -(frame.nr_pages() as isize));
        }
        frame.set_flags(PageFlags::MAPPEDTODISK);
        self.writeouts.fetch_add(1, Ordering::Relaxed);
        trace!("mapping {}: wrote back {:?}", self.id, frame);
        true
    }

    /// The number of frames written back so far.
    pub fn writeouts(&self) -> usize {
        self.writeouts.load(Ordering::Relaxed)
    }

    pub(crate) fn add_mmap(&self, space: &Arc<AddressSpace>, start: usize, nr_pages: usize, pgoff: usize) {
        let mut mmaps = self.mmaps.lock();
        mmaps.retain(|m| m.space.strong_count() > 0);
        mmaps.push(FileMmap { space: Arc::downgrade(space), start, nr_pages, pgoff });
    }

    /// Returns every (address space, virtual page) at which the file page `index` is mapped.
    pub(crate) fn mappers_of(&self, index: usize) -> Vec<(Arc<AddressSpace>, usize)> {
        self.mmaps.lock()
            .iter()
            .filter(|m| index >= m.pgoff && index < m.pgoff + m.nr_pages)
            .filter_map(|m| m.space.upgrade().map(|s| (s, m.start + (index - m.pgoff))))
            .collect()
    }
}

impl fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FileMapping({})", self.id)
    }
}
