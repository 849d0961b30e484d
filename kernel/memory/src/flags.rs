use bitflags::bitflags;

bitflags! {
    /// Per-frame state bits.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// The page lock. Held by whoever is changing the frame's identity.
        const LOCKED       = 1 << 0;
        const ERROR        = 1 << 1;
        const REFERENCED   = 1 << 2;
        const UPTODATE     = 1 << 3;
        const DIRTY        = 1 << 4;
        /// The frame is on its node's LRU list.
        const LRU          = 1 << 5;
        const ACTIVE       = 1 << 6;
        const WORKINGSET   = 1 << 7;
        const CHECKED      = 1 << 8;
        const MAPPEDTODISK = 1 << 9;
        const UNEVICTABLE  = 1 << 10;
        /// The frame has private metadata attached (e.g., filesystem buffers).
        const PRIVATE      = 1 << 11;
        const WRITEBACK    = 1 << 12;
        /// The frame is a hugetlbfs page, as opposed to a transparent huge page.
        const HUGETLB      = 1 << 13;
        /// The frame is backed by swap (anonymous or shmem) rather than a file.
        const SWAPBACKED   = 1 << 14;
        const SWAPCACHE    = 1 << 15;
        const YOUNG        = 1 << 16;
        const IDLE         = 1 << 17;
    }
}

bitflags! {
    /// Per-slot bits, i.e., the parts of a page table entry that survive migration.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SlotFlags: u8 {
        const WRITABLE   = 1 << 0;
        const DIRTY      = 1 << 1;
        const YOUNG      = 1 << 2;
        const SOFT_DIRTY = 1 << 3;
    }
}
