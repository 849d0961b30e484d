use std::sync::Arc;
use memory::{rmap::remove_migration_ptes, Frame};
use crate::{stats::Stage, unmap::Detached, MigrateReason, Migrator};

impl Migrator {
    /// Replaces the migration placeholders for `old` with slots mapping `target`,
    /// which is either the destination after a successful transfer or `old` itself
    /// to restore the original mappings.
    pub(crate) fn remap(&self, old: &Arc<Frame>, target: &Arc<Frame>, detached: &Detached) {
        if !detached.was_mapped {
            return;
        }
        let restored = remove_migration_ptes(old, target);
        if !Arc::ptr_eq(old, target) {
            self.counters.bump(Stage::Remapped, 1);
        }
        trace!("remapped {} slots of {:?} to {:?}", restored, old.pfn(), target.pfn());
    }

    /// Drops the caller's isolation of a source frame that has been migrated,
    /// or that was freed while it was isolated. The frame goes back to its allocator.
    pub(crate) fn release_source(&self, old: &Arc<Frame>) {
        self.nodes.dec_isolated(old);
        if old.put() {
            self.allocator.free_frame(old.clone());
        } else {
            debug!("{:?} is still referenced after migration, leaving it to its last user", old);
        }
    }

    /// Returns an isolated source frame that will not be migrated to its LRU list.
    pub(crate) fn putback_source(&self, old: &Arc<Frame>) {
        self.nodes.dec_isolated(old);
        if self.nodes.putback_lru_page(old) {
            self.allocator.free_frame(old.clone());
        }
        self.counters.bump(Stage::PutBack, 1);
    }

    /// Puts a migrated destination on its LRU list, dropping its allocation reference.
    pub(crate) fn finish_destination(&self, new: &Arc<Frame>, reason: MigrateReason) {
        new.set_last_migrate_reason(reason.code());
        if self.nodes.putback_lru_page(new) {
            // nothing maps or caches it, e.g., the source was only isolated
            self.allocator.free_frame(new.clone());
        }
    }

    /// Returns a destination that was not used.
    pub(crate) fn free_destination(&self, new: Arc<Frame>) {
        self.allocator.free_frame(new);
    }

    /// Returns every frame left on a migration list to its LRU list,
    /// ending its isolation.
    pub fn putback_movable_pages(&self, list: &mut Vec<Arc<Frame>>) {
        let count = list.len();
        for frame in list.drain(..) {
            self.putback_source(&frame);
        }
        if count > 0 {
            debug!("put back {} frames", count);
        }
    }
}
