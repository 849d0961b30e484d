use alloc::{sync::Arc, vec::Vec};
use kernel_config::memory::PAGE_SIZE;
use crate::{rmap::rmap_targets, Frame, PageFlags, Slot};

/// Flags that each base frame inherits when a huge frame is split.
const SPLIT_CARRIED_FLAGS: PageFlags = PageFlags::DIRTY
    .union(PageFlags::SWAPBACKED)
    .union(PageFlags::UPTODATE)
    .union(PageFlags::ACTIVE)
    .union(PageFlags::REFERENCED)
    .union(PageFlags::WORKINGSET)
    .union(PageFlags::UNEVICTABLE);

/// Splits an isolated, locked, anonymous transparent huge frame into base frames.
///
/// `frame` itself becomes the first base frame. The other base frames are returned
/// in order; each carries one reference for the caller, like the isolation reference
/// `frame` carries, and is mapped wherever `frame` was mapped.
/// The caller's isolation accounting stays correct, since it is counted per base frame.
///
/// Slots holding migration placeholders are not split, so callers split before unmapping.
pub fn split_huge_frame(frame: &Arc<Frame>) -> Result<Vec<Arc<Frame>>, &'static str> {
    if !frame.is_transhuge() {
        return Err("frame is not a transparent huge frame");
    }
    if !frame.is_locked() {
        return Err("frame must be locked to be split");
    }
    let anon_vma = frame.anon_vma().ok_or("only anonymous huge frames can be split")?;
    let nr_pages = frame.nr_pages();
    let head_index = frame.index();
    let carried = frame.flags() & SPLIT_CARRIED_FLAGS;

    let mut tails = Vec::with_capacity(nr_pages - 1);
    {
        let data = frame.content();
        for i in 1..nr_pages {
            let tail = Arc::new(Frame::new(frame.pfn() + i, frame.node(), 1));
            tail.content_mut().copy_from_slice(&data[i * PAGE_SIZE .. (i + 1) * PAGE_SIZE]);
            tail.set_anon(&anon_vma, head_index + i);
            tail.set_flags(carried);
            tail.set_memcg(frame.memcg());
            tail.set_alloc_tag(frame.alloc_tag());
            tails.push(tail);
        }
    }

    for (space, vpage) in rmap_targets(frame) {
        let mut slots = space.lock_slots();
        let flags = match slots.get(&vpage) {
            Some(Slot::Present { frame: f, flags }) if Arc::ptr_eq(f, frame) => *flags,
            _ => continue,
        };
        for (i, tail) in tails.iter().enumerate() {
            tail.get();
            tail.inc_map_count();
            slots.insert(vpage + 1 + i, Slot::Present { frame: tail.clone(), flags });
        }
    }

    frame.set_nr_pages(1);
    frame.truncate_content(PAGE_SIZE);
    debug!("split huge frame {:?} into {} base frames", frame.pfn(), nr_pages);
    Ok(tails)
}
