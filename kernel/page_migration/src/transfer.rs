//! The ownership handoff from a source frame to its destination.

use std::sync::Arc;
use memory::{FileMapping, Frame, NodeStatItem, PageFlags};
use crate::{stats::Stage, MigrateError, Migrator};

/// The number of references a detached source frame must have for its identity
/// to be handed over: the caller's isolation reference, plus one per page-cache slot
/// and one for attached private metadata if a file mapping owns it.
pub fn expected_page_refs(mapping: Option<&FileMapping>, frame: &Frame) -> usize {
    let mut expected = 1;
    if mapping.is_some() {
        expected += frame.nr_pages() + frame.has_private() as usize;
    }
    expected
}

impl Migrator {
    /// Hands the identity of the locked, detached `old` over to the locked `new`.
    ///
    /// Fails with [`MigrateError::Again`] if `old` has any reference beyond
    /// [`expected_page_refs()`] plus `extra`, or is no longer in its page cache.
    /// On success `new` has taken over `old`'s owner, index, and page-cache slots
    /// (with their references), and there is no going back.
    pub(crate) fn move_mapping(
        &self,
        mapping: Option<&Arc<FileMapping>>,
        new: &Arc<Frame>,
        old: &Frame,
        extra: usize,
    ) -> Result<(), MigrateError> {
        let expected = expected_page_refs(mapping.map(|m| &**m), old) + extra;

        let Some(mapping) = mapping else {
            if old.ref_count() != expected {
                trace!("{:?} has {} references, expected {}", old.pfn(), old.ref_count(), expected);
                return Err(MigrateError::Again);
            }
            new.copy_owner_from(old);
            if old.is_swapbacked() {
                new.set_flags(PageFlags::SWAPBACKED);
            }
            self.counters.bump(Stage::MappingChanged, 1);
            return Ok(());
        };

        let nr_pages = old.nr_pages();
        let index = old.index();
        let mut pages = mapping.lock_pages();
        let cached = pages.get(&index).is_some_and(|f| std::ptr::eq(&**f, old));
        if !cached || !old.ref_freeze(expected) {
            trace!("{:?} has {} references, expected {}", old.pfn(), old.ref_count(), expected);
            return Err(MigrateError::Again);
        }

        // nobody else can find `old` now, and `new` is not visible yet
        new.copy_owner_from(old);
        new.ref_add(nr_pages);
        let swapcache = old.test_flags(PageFlags::SWAPCACHE);
        if old.is_swapbacked() {
            new.set_flags(PageFlags::SWAPBACKED);
            if swapcache {
                new.set_flags(PageFlags::SWAPCACHE);
                new.set_private(old.private());
            }
        }
        let dirty = old.test_and_clear_flags(PageFlags::DIRTY);
        if dirty {
            new.set_flags(PageFlags::DIRTY);
        }

        for i in 0..nr_pages {
            pages.insert(index + i, new.clone());
        }
        // the page-cache references now belong to `new`
        old.ref_unfreeze(expected - nr_pages);
        drop(pages);

        let (from, to) = (old.node(), new.node());
        if from != to {
            let delta = nr_pages as isize;
            self.nodes.mod_state(from, NodeStatItem::FilePages, -delta);
            self.nodes.mod_state(to, NodeStatItem::FilePages, delta);
            if old.is_swapbacked() && !swapcache {
                self.nodes.mod_state(from, NodeStatItem::Shmem, -delta);
                self.nodes.mod_state(to, NodeStatItem::Shmem, delta);
            }
            if dirty && mapping.account_dirty() {
                self.nodes.mod_state(from, NodeStatItem::FileDirty, -delta);
                self.nodes.mod_state(to, NodeStatItem::FileDirty, delta);
            }
        }
        self.counters.bump(Stage::MappingChanged, 1);
        Ok(())
    }
}
