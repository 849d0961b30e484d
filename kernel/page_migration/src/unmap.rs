use std::sync::Arc;
use memory::{rmap::try_to_unmap, AnonVmaHandle, Frame, FrameOwner};
use crate::{stats::Stage, MigrateError, MigrateMode, MigrateReason, Migrator, SyncLevel};

/// What the unmap stage hands to the later stages of one item.
pub(crate) struct Detached {
    /// Keeps the source's anonymous reverse mapping alive until the item is retired.
    pub(crate) anon_vma: Option<AnonVmaHandle>,
    /// Whether any slot now holds a migration placeholder for the source.
    pub(crate) was_mapped: bool,
}

impl Migrator {
    /// Takes the page lock of `old`, then deals with writeback.
    ///
    /// The lock is only waited for if `force` is set and the mode and reason allow blocking.
    /// A frame under writeback fails as busy unless the mode is fully synchronous,
    /// in which case writeback is waited for (again only when `force` is set).
    /// On success, the caller holds the lock.
    pub(crate) fn lock_source(
        &self,
        old: &Frame,
        force: bool,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> Result<(), MigrateError> {
        if !old.trylock() {
            if !mode.may_block_on_lock(force, reason) {
                return Err(MigrateError::Again);
            }
            old.lock();
        }
        if old.is_writeback() {
            if mode.sync != SyncLevel::Sync {
                old.unlock();
                return Err(MigrateError::Busy);
            }
            if !force {
                old.unlock();
                return Err(MigrateError::Again);
            }
            old.wait_on_writeback();
        }
        Ok(())
    }

    /// Locks `new` and replaces every slot mapping `old` with a migration placeholder.
    ///
    /// `old` must be locked. On failure, `new` is unlocked again and no slot was touched.
    pub(crate) fn detach(&self, old: &Arc<Frame>, new: &Frame) -> Result<Detached, MigrateError> {
        // taken before the last slot goes away, which could otherwise free the reverse mapping
        let anon_vma = if old.is_anon() { old.anon_vma_handle() } else { None };

        if !new.trylock() {
            return Err(MigrateError::Again);
        }

        if matches!(old.owner(), FrameOwner::None) {
            if old.has_private() {
                // an orphan with leftover metadata: release it, so the frame can simply be freed
                old.try_release_private();
                new.unlock();
                return Err(MigrateError::Again);
            }
            return Ok(Detached { anon_vma, was_mapped: false });
        }

        let was_mapped = old.is_mapped();
        if was_mapped {
            let replaced = try_to_unmap(old, &self.nodes);
            trace!("unmapped {:?} from {} slots", old.pfn(), replaced);
            self.counters.bump(Stage::Unmapped, 1);
        }
        Ok(Detached { anon_vma, was_mapped })
    }
}
