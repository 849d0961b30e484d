//! Reverse-mapping walks: from a frame back to every slot that maps it.
//!
//! These are the operations that detach a frame from its address spaces
//! by installing migration placeholders, and that later replace those placeholders
//! with real slots to either the destination frame or, on failure, the original one.

use alloc::{sync::Arc, vec::Vec};
use crate::{AddressSpace, Frame, FrameOwner, MemoryNodes, PageFlags, Slot, SlotFlags};

/// Returns every (address space, virtual page) at which `frame` may be mapped.
pub fn rmap_targets(frame: &Frame) -> Vec<(Arc<AddressSpace>, usize)> {
    match frame.owner() {
        FrameOwner::Anon(anon_vma) => match anon_vma.upgrade() {
            Some(anon_vma) => {
                let vpage = frame.index();
                anon_vma.spaces().into_iter().map(|s| (s, vpage)).collect()
            }
            None => Vec::new(),
        },
        FrameOwner::File(mapping) => match mapping.upgrade() {
            Some(mapping) => mapping.mappers_of(frame.index()),
            None => Vec::new(),
        },
        FrameOwner::None => Vec::new(),
    }
}

/// Replaces every present slot mapping `frame` with a migration placeholder.
///
/// Each replaced slot drops its reference and its map count on `frame`.
/// A dirty slot marks the frame dirty and a young slot marks it referenced;
/// the placeholder keeps the slot's other bits. The caller must hold the frame's page lock
/// and a reference of its own.
/// Returns the number of slots replaced.
pub fn try_to_unmap(frame: &Arc<Frame>, nodes: &MemoryNodes) -> usize {
    let mut replaced = 0;
    for (space, vpage) in rmap_targets(frame) {
        let mut slots = space.lock_slots();
        let flags = match slots.get(&vpage) {
            Some(Slot::Present { frame: f, flags }) if Arc::ptr_eq(f, frame) => *flags,
            _ => continue,
        };
        // the frame takes over the slot's dirty and young bits
        let kept = flags.difference(SlotFlags::DIRTY | SlotFlags::YOUNG);
        slots.insert(vpage, Slot::Migration { frame: frame.clone(), flags: kept });
        drop(slots);

        if flags.contains(SlotFlags::DIRTY) {
            nodes.set_page_dirty(frame);
        }
        if flags.contains(SlotFlags::YOUNG) {
            frame.set_flags(PageFlags::REFERENCED);
        }
        frame.dec_map_count();
        if frame.put() {
            error!("BUG: unmapping {:?} from {:?} dropped its last reference", frame, space);
        }
        replaced += 1;
    }
    trace!("try_to_unmap: installed {} placeholders for {:?}", replaced, frame);
    replaced
}

/// Replaces every migration placeholder for `old` with a present slot mapping `new`.
///
/// `new` must already have `old`'s owner and index, which is how its reverse mapping
/// finds the placeholders. Passing the same frame as `old` and `new` restores the
/// original mappings after a failed migration.
/// Each restored slot keeps the placeholder's flags and takes a reference on `new`.
/// Returns the number of slots restored.
pub fn remove_migration_ptes(old: &Arc<Frame>, new: &Arc<Frame>) -> usize {
    let mut restored = 0;
    for (space, vpage) in rmap_targets(new) {
        let mut slots = space.lock_slots();
        let flags = match slots.get(&vpage) {
            Some(Slot::Migration { frame: f, flags }) if Arc::ptr_eq(f, old) => *flags,
            _ => continue,
        };
        new.get();
        new.inc_map_count();
        slots.insert(vpage, Slot::Present { frame: new.clone(), flags });
        restored += 1;
    }
    trace!("remove_migration_ptes: {:?} -> {:?}, {} slots", old.pfn(), new.pfn(), restored);
    restored
}
