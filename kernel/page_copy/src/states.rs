use memory::{Frame, PageFlags};

/// Flags copied verbatim from the source frame to the destination frame.
const COPIED_FLAGS: [PageFlags; 8] = [
    PageFlags::ERROR,
    PageFlags::REFERENCED,
    PageFlags::UPTODATE,
    PageFlags::WORKINGSET,
    PageFlags::CHECKED,
    PageFlags::MAPPEDTODISK,
    PageFlags::DIRTY,
    PageFlags::IDLE,
];

/// Carries the secondary state of `old` over to `new` after (or instead of) a content copy.
///
/// This moves the LRU activity state, access and dirty bits, the last CPU/pid
/// to touch the frame, the page owner tag, and the memory cgroup charge.
/// Swap-cache membership and private state stay behind and are cleared on `old`.
pub fn migrate_page_states(new: &Frame, old: &Frame) {
    for flag in COPIED_FLAGS {
        if old.test_flags(flag) {
            new.set_flags(flag);
        }
    }
    if old.test_and_clear_flags(PageFlags::ACTIVE) {
        new.set_flags(PageFlags::ACTIVE);
    } else if old.test_and_clear_flags(PageFlags::UNEVICTABLE) {
        new.set_flags(PageFlags::UNEVICTABLE);
    }
    if old.test_and_clear_flags(PageFlags::YOUNG) {
        new.set_flags(PageFlags::YOUNG);
    }

    new.xchg_last_cpupid(old.last_cpupid());

    old.clear_flags(PageFlags::SWAPCACHE);
    if old.has_private() {
        warn!("{:?} still has private metadata after migration; it stays behind", old);
    } else {
        old.set_private(0);
    }

    // anyone waiting for writeback of the destination can go now
    if new.is_writeback() {
        new.end_writeback();
    }

    new.set_alloc_tag(old.alloc_tag());
    new.set_memcg(old.memcg());
    old.set_memcg(0);
}
