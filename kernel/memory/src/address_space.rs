use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use core::{fmt, hint::spin_loop, sync::atomic::{AtomicUsize, Ordering}};
use kernel_config::memory::PAGE_SIZE;
use spin::{Mutex, RwLock};
use crate::{page_offset, vpage_of, AnonVma, FileMapping, Frame, MemoryNodes, SlotFlags};

static NEXT_ADDRESS_SPACE_ID: AtomicUsize = AtomicUsize::new(1);

/// What backs a virtual memory area.
#[derive(Clone)]
pub enum VmaKind {
    Anon(Arc<AnonVma>),
    File {
        mapping: Arc<FileMapping>,
        /// The file page offset mapped at the start of the area.
        pgoff: usize,
    },
}

/// A virtual memory area: a contiguous range of virtual pages with uniform backing.
#[derive(Clone)]
pub struct Vma {
    /// First virtual page.
    start: usize,
    /// One past the last virtual page.
    end: usize,
    kind: VmaKind,
    writable: bool,
    executable: bool,
    migratable: bool,
}

impl Vma {
    pub fn start_addr(&self) -> usize {
        self.start * PAGE_SIZE
    }

    pub fn end_addr(&self) -> usize {
        self.end * PAGE_SIZE
    }

    pub fn contains(&self, addr: usize) -> bool {
        let vpage = vpage_of(addr);
        vpage >= self.start && vpage < self.end
    }

    pub fn kind(&self) -> &VmaKind {
        &self.kind
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Returns `false` for areas whose frames must never move, e.g., device mappings.
    pub fn is_migratable(&self) -> bool {
        self.migratable
    }

    fn file_index(&self, vpage: usize) -> Option<usize> {
        match &self.kind {
            VmaKind::File { pgoff, .. } => Some(pgoff + (vpage - self.start)),
            VmaKind::Anon(_) => None,
        }
    }
}

impl fmt::Debug for Vma {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Vma({:#X}..{:#X}", self.start_addr(), self.end_addr())?;
        match &self.kind {
            VmaKind::Anon(anon) => write!(f, ", {:?})", anon),
            VmaKind::File { mapping, pgoff } => write!(f, ", {:?} +{})", mapping, pgoff),
        }
    }
}


/// The entry that maps one virtual page (or, for a huge unit, its first virtual page)
/// to a frame.
#[derive(Clone)]
pub enum Slot {
    /// A real mapping. Holds a reference on the frame and counts toward its map count.
    Present { frame: Arc<Frame>, flags: SlotFlags },
    /// A migration placeholder: the frame is being migrated,
    /// and any access must wait until the placeholder is replaced.
    /// Holds no reference on the frame.
    Migration { frame: Arc<Frame>, flags: SlotFlags },
}

impl Slot {
    pub fn frame(&self) -> &Arc<Frame> {
        match self {
            Slot::Present { frame, .. } | Slot::Migration { frame, .. } => frame,
        }
    }

    pub fn flags(&self) -> SlotFlags {
        match self {
            Slot::Present { flags, .. } | Slot::Migration { flags, .. } => *flags,
        }
    }

    pub fn is_migration(&self) -> bool {
        matches!(self, Slot::Migration { .. })
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Slot::Present { frame, flags } => write!(f, "Present({:?}, {:?})", frame.pfn(), flags),
            Slot::Migration { frame, flags } => write!(f, "Migration({:?}, {:?})", frame.pfn(), flags),
        }
    }
}

/// The result of unmapping a single slot.
#[derive(Debug)]
pub enum UnmapResult {
    /// The slot held the last reference to the frame,
    /// which must now be released to its allocator.
    Exclusive(Arc<Frame>),
    /// Other references to the frame remain.
    NonExclusive(Arc<Frame>),
}


/// An address space: virtual memory areas plus the slots that map their pages.
pub struct AddressSpace {
    id: usize,
    vmas: RwLock<Vec<Vma>>,
    /// Slots keyed by virtual page number. Huge units have one slot at their first page.
    slots: Mutex<BTreeMap<usize, Slot>>,
}

/// Returns the slot covering `vpage` and the virtual page it is keyed at.
fn find_slot(slots: &BTreeMap<usize, Slot>, vpage: usize) -> Option<(usize, &Slot)> {
    let (&head, slot) = slots.range(..=vpage).next_back()?;
    if vpage < head + slot.frame().nr_pages() {
        Some((head, slot))
    } else {
        None
    }
}

impl AddressSpace {
    pub fn new() -> Arc<AddressSpace> {
        Arc::new(AddressSpace {
            id: NEXT_ADDRESS_SPACE_ID.fetch_add(1, Ordering::Relaxed),
            vmas: RwLock::new(Vec::new()),
            slots: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn add_vma(&self, vma: Vma) -> Result<(), &'static str> {
        if vma.start >= vma.end {
            return Err("cannot map an empty range");
        }
        let mut vmas = self.vmas.write();
        if vmas.iter().any(|v| v.start < vma.end && vma.start < v.end) {
            return Err("range overlaps an existing area");
        }
        vmas.push(vma);
        Ok(())
    }

    /// Creates an anonymous area of `nr_pages` pages starting at the page-aligned `addr`.
    pub fn mmap_anon(self: &Arc<Self>, addr: usize, nr_pages: usize, writable: bool) -> Result<Arc<AnonVma>, &'static str> {
        if page_offset(addr) != 0 {
            return Err("address is not page-aligned");
        }
        let anon_vma = AnonVma::new();
        let start = vpage_of(addr);
        self.add_vma(Vma {
            start,
            end: start + nr_pages,
            kind: VmaKind::Anon(anon_vma.clone()),
            writable,
            executable: false,
            migratable: true,
        })?;
        anon_vma.link(self);
        Ok(anon_vma)
    }

    /// Maps `nr_pages` pages of `mapping`, starting at file page `pgoff`,
    /// at the page-aligned `addr`.
    pub fn mmap_file(
        self: &Arc<Self>,
        addr: usize,
        nr_pages: usize,
        mapping: &Arc<FileMapping>,
        pgoff: usize,
        writable: bool,
    ) -> Result<(), &'static str> {
        if page_offset(addr) != 0 {
            return Err("address is not page-aligned");
        }
        let start = vpage_of(addr);
        self.add_vma(Vma {
            start,
            end: start + nr_pages,
            kind: VmaKind::File { mapping: mapping.clone(), pgoff },
            writable,
            executable: false,
            migratable: true,
        })?;
        mapping.add_mmap(self, start, nr_pages, pgoff);
        Ok(())
    }

    /// Marks the area containing `addr` as (non-)executable.
    pub fn set_executable(&self, addr: usize, executable: bool) -> Result<(), &'static str> {
        let mut vmas = self.vmas.write();
        let vma = vmas.iter_mut().find(|v| v.contains(addr)).ok_or("no area contains that address")?;
        vma.executable = executable;
        Ok(())
    }

    /// Marks the area containing `addr` as (non-)migratable.
    pub fn set_migratable(&self, addr: usize, migratable: bool) -> Result<(), &'static str> {
        let mut vmas = self.vmas.write();
        let vma = vmas.iter_mut().find(|v| v.contains(addr)).ok_or("no area contains that address")?;
        vma.migratable = migratable;
        Ok(())
    }

    pub fn find_vma(&self, addr: usize) -> Option<Vma> {
        self.vmas.read().iter().find(|v| v.contains(addr)).cloned()
    }

    /// Maps `frame` at the page-aligned `addr`, as a page fault would.
    ///
    /// In an anonymous area, an unowned frame becomes an anonymous frame of that area.
    /// In a file area, `frame` must already be the page-cache frame for that file offset.
    pub fn map_frame(&self, addr: usize, frame: &Arc<Frame>) -> Result<(), &'static str> {
        if page_offset(addr) != 0 {
            return Err("address is not page-aligned");
        }
        let vma = self.find_vma(addr).ok_or("no area contains that address")?;
        let vpage = vpage_of(addr);
        let nr_pages = frame.nr_pages();
        if vpage + nr_pages > vma.end {
            return Err("frame extends past the end of its area");
        }

        let mut slots = self.slots.lock();
        if slots.range(vpage .. vpage + nr_pages).next().is_some() || find_slot(&slots, vpage).is_some() {
            return Err("address is already mapped");
        }
        match (&vma.kind, vma.file_index(vpage)) {
            (VmaKind::Anon(anon_vma), _) => match frame.owner() {
                crate::FrameOwner::None => frame.set_anon(anon_vma, vpage),
                crate::FrameOwner::Anon(_) if frame.index() == vpage => { }
                _ => return Err("frame is owned by something else"),
            },
            (VmaKind::File { mapping, .. }, Some(index)) => {
                let cached = mapping.find_frame(index).ok_or("file page is not cached")?;
                if !Arc::ptr_eq(&cached, frame) {
                    return Err("frame is not the cached frame for that file page");
                }
            }
            (VmaKind::File { .. }, None) => return Err("file area without an offset"),
        }
        let flags = if vma.writable { SlotFlags::WRITABLE } else { SlotFlags::empty() };
        frame.get();
        frame.inc_map_count();
        slots.insert(vpage, Slot::Present { frame: frame.clone(), flags });
        Ok(())
    }

    /// Maps a freshly allocated `frame` at `addr` and puts it on its node's LRU list,
    /// as an anonymous page fault would.
    /// The allocation reference is consumed, leaving the slot's reference.
    pub fn install_new_frame(&self, addr: usize, frame: &Arc<Frame>, nodes: &MemoryNodes) -> Result<(), &'static str> {
        self.map_frame(addr, frame)?;
        nodes.lru_add(frame);
        frame.put();
        Ok(())
    }

    /// Removes the slot mapping `addr`, as `munmap` would,
    /// waiting first if the slot holds a migration placeholder.
    pub fn unmap(&self, addr: usize) -> Result<UnmapResult, &'static str> {
        let vpage = vpage_of(addr);
        loop {
            {
                let mut slots = self.slots.lock();
                let (head, slot) = find_slot(&slots, vpage).ok_or("address is not mapped")?;
                if let Slot::Present { frame, .. } = slot {
                    let frame = frame.clone();
                    slots.remove(&head);
                    frame.dec_map_count();
                    return Ok(if frame.put() {
                        UnmapResult::Exclusive(frame)
                    } else {
                        UnmapResult::NonExclusive(frame)
                    });
                }
            }
            spin_loop();
        }
    }

    /// Returns a copy of the slot covering `addr`.
    pub fn slot(&self, addr: usize) -> Option<Slot> {
        find_slot(&self.slots.lock(), vpage_of(addr)).map(|(_, s)| s.clone())
    }

    /// Returns the frame currently mapped at `addr`,
    /// or `None` if nothing is mapped there or its slot holds a migration placeholder.
    pub fn follow_page(&self, addr: usize) -> Option<Arc<Frame>> {
        match find_slot(&self.slots.lock(), vpage_of(addr)) {
            Some((_, Slot::Present { frame, .. })) => Some(frame.clone()),
            _ => None,
        }
    }

    /// Runs `f` on the present slot covering `addr`,
    /// waiting while that slot holds a migration placeholder.
    ///
    /// `f` runs with the slot table locked, so the frame cannot be unmapped underneath it.
    /// It receives the byte offset of `addr` into the frame.
    fn with_present_slot<R>(
        &self,
        addr: usize,
        mut f: impl FnMut(&Arc<Frame>, &mut SlotFlags, usize) -> Result<R, &'static str>,
    ) -> Result<R, &'static str> {
        let vpage = vpage_of(addr);
        if self.find_vma(addr).is_none() {
            return Err("no area contains that address");
        }
        loop {
            {
                let mut slots = self.slots.lock();
                let (head, present) = match find_slot(&slots, vpage) {
                    Some((head, slot)) => (head, !slot.is_migration()),
                    None => return Err("address is not mapped"),
                };
                if present {
                    if let Some(Slot::Present { frame, flags }) = slots.get_mut(&head) {
                        let offset = (vpage - head) * PAGE_SIZE + page_offset(addr);
                        return f(frame, flags, offset);
                    }
                }
            }
            // the frame is being migrated
            spin_loop();
        }
    }

    /// Reads from virtual memory, as a load instruction would.
    pub fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), &'static str> {
        self.with_present_slot(addr, |frame, flags, offset| {
            *flags |= SlotFlags::YOUNG;
            frame.read(offset, buf)
        })
    }

    /// Writes to virtual memory, as a store instruction would.
    pub fn write(&self, addr: usize, bytes: &[u8]) -> Result<(), &'static str> {
        self.with_present_slot(addr, |frame, flags, offset| {
            if !flags.contains(SlotFlags::WRITABLE) {
                return Err("address is mapped read-only");
            }
            *flags |= SlotFlags::YOUNG | SlotFlags::DIRTY | SlotFlags::SOFT_DIRTY;
            frame.write(offset, bytes)
        })
    }

    /// Creates a child address space that shares every area and every mapped frame with this one.
    pub fn fork(self: &Arc<Self>) -> Arc<AddressSpace> {
        let child = AddressSpace::new();
        let vmas = self.vmas.read().clone();
        for vma in &vmas {
            match &vma.kind {
                VmaKind::Anon(anon_vma) => anon_vma.link(&child),
                VmaKind::File { mapping, pgoff } => mapping.add_mmap(&child, vma.start, vma.end - vma.start, *pgoff),
            }
        }
        *child.vmas.write() = vmas;

        let slots = self.slots.lock();
        let mut child_slots = child.slots.lock();
        for (vpage, slot) in slots.iter() {
            if let Slot::Present { frame, .. } = slot {
                frame.get();
                frame.inc_map_count();
            }
            child_slots.insert(*vpage, slot.clone());
        }
        drop(child_slots);
        child
    }

    /// Locks the slot table, for reverse-mapping operations.
    pub(crate) fn lock_slots(&self) -> spin::MutexGuard<'_, BTreeMap<usize, Slot>> {
        self.slots.lock()
    }

    /// Returns the virtual addresses of all slots, in ascending order.
    pub fn mapped_addrs(&self) -> Vec<usize> {
        self.slots.lock().keys().map(|vpage| vpage * PAGE_SIZE).collect()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AddressSpace({})", self.id)
    }
}
