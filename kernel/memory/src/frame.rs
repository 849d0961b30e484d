use alloc::{boxed::Box, sync::{Arc, Weak}};
use core::{
    fmt,
    hint::spin_loop,
    sync::atomic::{AtomicI32, AtomicIsize, AtomicU32, AtomicUsize, Ordering},
};
use kernel_config::memory::PAGE_SIZE;
use numa_topology::NodeId;
use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use crate::{AnonVma, AnonVmaHandle, FileMapping, PageFlags, Pfn};

/// The structure that owns a frame's identity and can find every slot mapping it.
#[derive(Clone, Default)]
pub enum FrameOwner {
    /// Not (yet) owned, e.g., a freshly allocated frame.
    #[default]
    None,
    /// Anonymous memory, reverse-mapped through an [`AnonVma`].
    Anon(Weak<AnonVma>),
    /// File-backed memory held in a [`FileMapping`]'s page cache.
    File(Weak<FileMapping>),
}

impl fmt::Debug for FrameOwner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FrameOwner::None => write!(f, "None"),
            FrameOwner::Anon(a) => match a.upgrade() {
                Some(a) => write!(f, "Anon({})", a.id()),
                None => write!(f, "Anon(<gone>)"),
            },
            FrameOwner::File(m) => match m.upgrade() {
                Some(m) => write!(f, "File({})", m.id()),
                None => write!(f, "File(<gone>)"),
            },
        }
    }
}


/// A physical frame, or a huge unit of `nr_pages` contiguous frames
/// that is allocated, mapped, and migrated as one.
pub struct Frame {
    pfn: Pfn,
    node: NodeId,
    nr_pages: AtomicUsize,
    flags: AtomicU32,
    ref_count: AtomicUsize,
    map_count: AtomicUsize,
    owner: Mutex<FrameOwner>,
    /// The virtual page number for anonymous frames, the file page offset for file frames.
    index: AtomicUsize,
    /// Owner-specific private value, e.g., a swap entry.
    private: AtomicUsize,
    last_cpupid: AtomicIsize,
    /// The memory cgroup charged for this frame, 0 if none.
    memcg: AtomicUsize,
    /// The allocation-site tag recorded by page owner tracking, 0 if none.
    alloc_tag: AtomicUsize,
    last_migrate_reason: AtomicI32,
    data: RwLock<Box<[u8]>>,
}

impl Frame {
    /// Creates a zero-filled frame with a reference count of 1,
    /// the reference being held by the caller (the allocator's client).
    pub fn new(pfn: Pfn, node: NodeId, nr_pages: usize) -> Frame {
        let nr_pages = nr_pages.max(1);
        Frame {
            pfn,
            node,
            nr_pages: AtomicUsize::new(nr_pages),
            flags: AtomicU32::new(0),
            ref_count: AtomicUsize::new(1),
            map_count: AtomicUsize::new(0),
            owner: Mutex::new(FrameOwner::None),
            index: AtomicUsize::new(0),
            private: AtomicUsize::new(0),
            last_cpupid: AtomicIsize::new(-1),
            memcg: AtomicUsize::new(0),
            alloc_tag: AtomicUsize::new(0),
            last_migrate_reason: AtomicI32::new(-1),
            data: RwLock::new(vec![0u8; nr_pages * PAGE_SIZE].into_boxed_slice()),
        }
    }

    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The number of base frames in this unit.
    pub fn nr_pages(&self) -> usize {
        self.nr_pages.load(Ordering::Acquire)
    }

    pub(crate) fn set_nr_pages(&self, nr_pages: usize) {
        self.nr_pages.store(nr_pages, Ordering::Release);
    }

    pub fn size_in_bytes(&self) -> usize {
        self.nr_pages() * PAGE_SIZE
    }

    pub fn is_huge(&self) -> bool {
        self.nr_pages() > 1
    }

    pub fn is_hugetlb(&self) -> bool {
        self.test_flags(PageFlags::HUGETLB)
    }

    /// Returns `true` for a transparent huge page: a huge unit that is not a hugetlbfs page.
    pub fn is_transhuge(&self) -> bool {
        self.is_huge() && !self.is_hugetlb()
    }

    // ---------------------------------------------------------------------
    // Flags
    // ---------------------------------------------------------------------

    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Returns `true` if all of the given flags are set.
    pub fn test_flags(&self, flags: PageFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn set_flags(&self, flags: PageFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: PageFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Sets the given flags, returning `true` if they were all already set.
    pub fn test_and_set_flags(&self, flags: PageFlags) -> bool {
        let prev = self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
        prev & flags.bits() == flags.bits()
    }

    /// Clears the given flags, returning `true` if they were all set beforehand.
    pub fn test_and_clear_flags(&self, flags: PageFlags) -> bool {
        let prev = self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
        prev & flags.bits() == flags.bits()
    }

    pub fn is_dirty(&self) -> bool {
        self.test_flags(PageFlags::DIRTY)
    }

    pub fn is_swapbacked(&self) -> bool {
        self.test_flags(PageFlags::SWAPBACKED)
    }

    /// Returns `true` if this frame caches file content,
    /// i.e., it is accounted as a file page rather than an anonymous page.
    pub fn is_file_cache(&self) -> bool {
        !self.is_swapbacked()
    }

    // ---------------------------------------------------------------------
    // Reference count
    // ---------------------------------------------------------------------

    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Takes a reference.
    pub fn get(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn ref_add(&self, count: usize) {
        self.ref_count.fetch_add(count, Ordering::AcqRel);
    }

    /// Takes a reference unless the count is zero, which means the frame is
    /// either free or frozen by a migrator.
    pub fn try_get(&self) -> bool {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| if c == 0 { None } else { Some(c + 1) })
            .is_ok()
    }

    /// Drops a reference, returning `true` if it was the last one,
    /// in which case the caller must release the frame to its allocator.
    pub fn put(&self) -> bool {
        self.ref_sub(1)
    }

    /// Drops `count` references, returning `true` if the count reached zero.
    pub fn ref_sub(&self, count: usize) -> bool {
        match self.ref_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(count)) {
            Ok(prev) => prev == count,
            Err(prev) => {
                error!("BUG: dropping {} references from {:?}, which has only {}", count, self, prev);
                false
            }
        }
    }

    /// Freezes the reference count at zero if it currently equals `expected`.
    ///
    /// While frozen, [`try_get()`](Frame::try_get) fails, so no new user can find this frame.
    /// Returns `false` and leaves the count untouched if it did not equal `expected`.
    pub fn ref_freeze(&self, expected: usize) -> bool {
        self.ref_count
            .compare_exchange(expected, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unfreezes a frozen reference count, setting it to `count`.
    pub fn ref_unfreeze(&self, count: usize) {
        if self.ref_count.swap(count, Ordering::AcqRel) != 0 {
            error!("BUG: unfreezing {:?}, whose reference count was not frozen", self);
        }
    }

    // ---------------------------------------------------------------------
    // Map count
    // ---------------------------------------------------------------------

    /// The number of present slots that map this frame.
    pub fn map_count(&self) -> usize {
        self.map_count.load(Ordering::Acquire)
    }

    pub fn is_mapped(&self) -> bool {
        self.map_count() > 0
    }

    pub(crate) fn inc_map_count(&self) {
        self.map_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_map_count(&self) {
        if self.map_count.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1)).is_err() {
            error!("BUG: map count underflow on {:?}", self);
        }
    }

    // ---------------------------------------------------------------------
    // Page lock and writeback
    // ---------------------------------------------------------------------

    /// Tries to take the page lock without waiting.
    pub fn trylock(&self) -> bool {
        !self.test_and_set_flags(PageFlags::LOCKED)
    }

    /// Takes the page lock, waiting for the current holder to release it.
    pub fn lock(&self) {
        while !self.trylock() {
            spin_loop();
        }
    }

    pub fn unlock(&self) {
        if !self.test_and_clear_flags(PageFlags::LOCKED) {
            error!("BUG: unlocking {:?}, which was not locked", self);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.test_flags(PageFlags::LOCKED)
    }

    pub fn is_writeback(&self) -> bool {
        self.test_flags(PageFlags::WRITEBACK)
    }

    pub fn set_writeback(&self) {
        self.set_flags(PageFlags::WRITEBACK);
    }

    pub fn end_writeback(&self) {
        self.clear_flags(PageFlags::WRITEBACK);
    }

    /// Waits until writeback of this frame has completed.
    pub fn wait_on_writeback(&self) {
        while self.is_writeback() {
            spin_loop();
        }
    }

    // ---------------------------------------------------------------------
    // Owner and index
    // ---------------------------------------------------------------------

    pub fn owner(&self) -> FrameOwner {
        self.owner.lock().clone()
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Acquire)
    }

    pub fn is_anon(&self) -> bool {
        matches!(*self.owner.lock(), FrameOwner::Anon(_))
    }

    /// Returns the file mapping that owns this frame, if any.
    pub fn mapping(&self) -> Option<Arc<FileMapping>> {
        match &*self.owner.lock() {
            FrameOwner::File(mapping) => mapping.upgrade(),
            _ => None,
        }
    }

    pub fn anon_vma(&self) -> Option<Arc<AnonVma>> {
        match &*self.owner.lock() {
            FrameOwner::Anon(anon) => anon.upgrade(),
            _ => None,
        }
    }

    /// Takes a handle that keeps this frame's anonymous reverse mapping alive
    /// while the frame is unmapped.
    pub fn anon_vma_handle(&self) -> Option<AnonVmaHandle> {
        self.anon_vma().map(AnonVmaHandle::new)
    }

    /// Makes this an anonymous frame at the given virtual page.
    pub fn set_anon(&self, anon_vma: &Arc<AnonVma>, vpage: usize) {
        *self.owner.lock() = FrameOwner::Anon(Arc::downgrade(anon_vma));
        self.index.store(vpage, Ordering::Release);
        self.set_flags(PageFlags::SWAPBACKED);
    }

    pub(crate) fn set_file(&self, mapping: &Arc<FileMapping>, index: usize) {
        *self.owner.lock() = FrameOwner::File(Arc::downgrade(mapping));
        self.index.store(index, Ordering::Release);
    }

    pub fn clear_owner(&self) {
        *self.owner.lock() = FrameOwner::None;
    }

    /// Gives this frame the same owner and index as `other`.
    pub fn copy_owner_from(&self, other: &Frame) {
        let owner = other.owner();
        *self.owner.lock() = owner;
        self.index.store(other.index(), Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Private metadata
    // ---------------------------------------------------------------------

    pub fn has_private(&self) -> bool {
        self.test_flags(PageFlags::PRIVATE)
    }

    pub fn private(&self) -> usize {
        self.private.load(Ordering::Acquire)
    }

    /// Sets the private value without attaching metadata (e.g., a swap entry).
    pub fn set_private(&self, value: usize) {
        self.private.store(value, Ordering::Release);
    }

    /// Attaches private metadata, which holds a reference on the frame.
    pub fn attach_private(&self, value: usize) {
        self.private.store(value, Ordering::Release);
        if !self.test_and_set_flags(PageFlags::PRIVATE) {
            self.get();
        }
    }

    /// Detaches private metadata, dropping its reference, and returns its value.
    pub fn detach_private(&self) -> usize {
        if self.test_and_clear_flags(PageFlags::PRIVATE) && self.put() {
            error!("BUG: {:?} lost its last reference when detaching private metadata", self);
        }
        self.private.swap(0, Ordering::AcqRel)
    }

    /// Releases private metadata if it is clean.
    /// Returns `false` if the metadata is still in use and could not be released.
    pub fn try_release_private(&self) -> bool {
        if !self.has_private() {
            return true;
        }
        if self.is_dirty() || self.is_writeback() {
            return false;
        }
        self.detach_private();
        true
    }

    // ---------------------------------------------------------------------
    // Secondary state
    // ---------------------------------------------------------------------

    pub fn last_cpupid(&self) -> isize {
        self.last_cpupid.load(Ordering::Acquire)
    }

    /// Sets the last CPU/pid to access this frame, returning the previous value.
    pub fn xchg_last_cpupid(&self, cpupid: isize) -> isize {
        self.last_cpupid.swap(cpupid, Ordering::AcqRel)
    }

    pub fn memcg(&self) -> usize {
        self.memcg.load(Ordering::Acquire)
    }

    pub fn set_memcg(&self, memcg: usize) {
        self.memcg.store(memcg, Ordering::Release);
    }

    pub fn alloc_tag(&self) -> usize {
        self.alloc_tag.load(Ordering::Acquire)
    }

    pub fn set_alloc_tag(&self, tag: usize) {
        self.alloc_tag.store(tag, Ordering::Release);
    }

    /// The reason code of the migration that produced this frame, if any.
    pub fn last_migrate_reason(&self) -> Option<u8> {
        u8::try_from(self.last_migrate_reason.load(Ordering::Acquire)).ok()
    }

    pub fn set_last_migrate_reason(&self, reason: u8) {
        self.last_migrate_reason.store(reason as i32, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // Content
    // ---------------------------------------------------------------------

    pub fn content(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    pub fn content_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    pub(crate) fn truncate_content(&self, len: usize) {
        let mut data = self.data.write();
        if data.len() > len {
            let truncated: Box<[u8]> = data[..len].into();
            *data = truncated;
        }
    }

    /// Reads `buf.len()` bytes starting at `offset` bytes into this frame.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), &'static str> {
        let data = self.data.read();
        let end = offset.checked_add(buf.len()).ok_or("read range overflows")?;
        let src = data.get(offset..end).ok_or("read extends past the end of the frame")?;
        buf.copy_from_slice(src);
        Ok(())
    }

    /// Writes `bytes` starting at `offset` bytes into this frame.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), &'static str> {
        let mut data = self.data.write();
        let end = offset.checked_add(bytes.len()).ok_or("write range overflows")?;
        let dst = data.get_mut(offset..end).ok_or("write extends past the end of the frame")?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    pub fn fill(&self, byte: u8) {
        self.data.write().fill(byte);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Frame({:?} node {}", self.pfn, self.node)?;
        if self.is_huge() {
            write!(f, " x{}", self.nr_pages())?;
        }
        write!(f, ", refs {}, maps {})", self.ref_count(), self.map_count())
    }
}
