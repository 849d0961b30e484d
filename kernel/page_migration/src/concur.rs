//! The concurrent path: each pass unmaps a whole batch, transfers it, copies it with one
//! call into the copy engine, and remaps it.

use std::sync::Arc;
use memory::{Frame, PageFlags};
use numa_topology::NodeId;
use page_copy::{CopyMode, CopyPair};
use crate::{
    stats::Stage,
    unmap::Detached,
    Batch, MigrateError, MigrateMode, MigrateModeFlags, MigrateReason, Migrator, WorkItem, WorkItemState,
};

impl Migrator {
    /// Migrates every frame on `from` to `node` in batches.
    ///
    /// Each pass takes every pending item through the unmap stage; the items that were
    /// detached then go through the mapping transfer together, are copied by a single
    /// call into the copy engine, and are remapped. Items whose transfer finds an
    /// unexpected reference are restored and retried in the next pass. The first pass
    /// never blocks on page locks; later passes may.
    ///
    /// Hugetlb frames and frames owned by a file mapping are delegated to the serial path,
    /// as are transparent huge frames for which no destination could be allocated.
    /// Failing to allocate a destination for any other frame aborts it and the rest of
    /// the pass: the aborted frames are counted as not migrated, are not attempted again,
    /// and stay on `from`. Every other frame still on `from` after the last pass is
    /// handed to [`migrate_pages()`](Migrator::migrate_pages).
    ///
    /// Returns the number of frames that were not migrated by either path.
    pub fn migrate_pages_concur(
        &self,
        from: &mut Vec<Arc<Frame>>,
        node: NodeId,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> usize {
        let passes = self.settings.read().concur_passes;
        let copy_mode = self.copy_mode(mode);
        let mut batch = Batch::new(from);
        let mut nr_failed = 0;
        let mut nr_succeeded = 0;
        let mut retry = 1;

        let mut pass = 0;
        while pass < passes && retry > 0 {
            retry = 0;
            let force = pass > 0;
            let mut aborted = false;

            for idx in batch.indices_in(WorkItemState::Pending) {
                let item = batch.item_mut(idx);
                if aborted {
                    item.set_state(WorkItemState::Aborted);
                    continue;
                }
                item.set_state(WorkItemState::Unmapping);
                let old = item.old.clone();
                let rc = if old.is_hugetlb() || old.mapping().is_some() {
                    Err(MigrateError::NoDev)
                } else {
                    self.unmap_and_get_new(item, node, force, mode, reason)
                };
                match rc {
                    Ok(()) => {
                        if item.state == WorkItemState::Migrated {
                            nr_succeeded += 1;
                        }
                    }
                    Err(MigrateError::NoDev) => self.delegate(item),
                    Err(MigrateError::NoMem) if old.is_transhuge() => self.delegate(item),
                    Err(MigrateError::NoMem) => {
                        warn!("no destination for {:?} on node {}, aborting the rest of the pass", old.pfn(), node);
                        item.set_state(WorkItemState::Aborted);
                        aborted = true;
                    }
                    Err(MigrateError::Again) => {
                        item.set_state(WorkItemState::Pending);
                        retry += 1;
                    }
                    Err(e) => {
                        item.set_state(WorkItemState::Failed(e));
                        nr_failed += 1;
                    }
                }
            }

            retry += self.transfer_unmapped(&mut batch);
            nr_succeeded += self.copy_and_retire(&mut batch, copy_mode, mode, reason);
            batch.transition_all(WorkItemState::Restored, WorkItemState::Pending);
            pass += 1;
            if aborted {
                break;
            }
        }

        let aborted = batch.frames_in(WorkItemState::Aborted);
        nr_failed += aborted.len();
        *from = batch.leftovers();
        self.counters.count_events(nr_succeeded, nr_failed);
        debug!("concurrent migration to node {}: {} migrated, {} failed ({} aborted), {} left for the serial path after {} passes",
            node, nr_succeeded, nr_failed, aborted.len(), from.len(), pass);

        if !from.is_empty() {
            nr_failed += self.migrate_pages(from, node, mode, reason);
        }
        from.extend(aborted);
        nr_failed
    }

    fn delegate(&self, item: &mut WorkItem) {
        item.set_state(WorkItemState::Delegated);
        self.counters.bump(Stage::Delegated, 1);
    }

    /// Allocates a destination for one pending item and takes it through the unmap stage.
    ///
    /// On success the item is `Unmapped`, or `Migrated` if its source turned out to have
    /// been freed meanwhile. On a permanent failure the source has been put back.
    fn unmap_and_get_new(
        &self,
        item: &mut WorkItem,
        node: NodeId,
        force: bool,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> Result<(), MigrateError> {
        let old = item.old.clone();
        let new = self.allocate_destination(&old, node).ok_or(MigrateError::NoMem)?;

        if old.ref_count() == 1 {
            // freed from under us: only our isolation reference is left
            old.clear_flags(PageFlags::ACTIVE | PageFlags::UNEVICTABLE);
            self.free_destination(new);
            self.release_source(&old);
            item.set_state(WorkItemState::Migrated);
            return Ok(());
        }

        let rc = self.lock_source(&old, force, mode, reason).and_then(|()| {
            self.detach(&old, &new).map_err(|e| {
                old.unlock();
                e
            })
        });
        match rc {
            Ok(detached) if old.is_mapped() => {
                // some slot could not be replaced
                self.remap(&old, &old, &detached);
                new.unlock();
                drop(detached);
                old.unlock();
                self.free_destination(new);
                Err(MigrateError::Again)
            }
            Ok(detached) => {
                item.new = Some(new);
                item.anon_vma = detached.anon_vma;
                item.was_mapped = detached.was_mapped;
                item.set_state(WorkItemState::Unmapped);
                Ok(())
            }
            Err(e) => {
                if !e.is_retryable() {
                    self.putback_source(&old);
                }
                self.free_destination(new);
                Err(e)
            }
        }
    }

    /// Runs the mapping transfer over every unmapped item.
    /// Returns the number of items that had to be restored.
    fn transfer_unmapped(&self, batch: &mut Batch) -> usize {
        let mut restored = 0;
        for idx in batch.indices_in(WorkItemState::Unmapped) {
            let item = batch.item_mut(idx);
            item.set_state(WorkItemState::Transferring);
            let Some(new) = item.new.clone() else {
                error!("BUG: unmapped {:?} has no destination", item);
                continue;
            };
            match self.move_mapping(None, &new, &item.old, 0) {
                Ok(()) => item.set_state(WorkItemState::Copying),
                Err(_) => {
                    self.restore(item);
                    restored += 1;
                }
            }
        }
        restored
    }

    /// Undoes the unmap stage of an item whose transfer was aborted.
    fn restore(&self, item: &mut WorkItem) {
        let detached = Detached { anon_vma: item.anon_vma.take(), was_mapped: item.was_mapped };
        self.remap(&item.old, &item.old, &detached);
        item.was_mapped = false;
        if let Some(new) = item.new.take() {
            new.unlock();
            drop(detached);
            item.old.unlock();
            self.free_destination(new);
        } else {
            drop(detached);
            item.old.unlock();
        }
        item.set_state(WorkItemState::Restored);
    }

    /// Copies every transferred item with one call into the copy engine, then remaps
    /// and retires each of them. Returns the number of items migrated.
    fn copy_and_retire(&self, batch: &mut Batch, copy_mode: CopyMode, mode: MigrateMode, reason: MigrateReason) -> usize {
        let copying = batch.indices_in(WorkItemState::Copying);
        if copying.is_empty() {
            return 0;
        }
        let pairs: Vec<CopyPair> = copying.iter()
            .filter_map(|&idx| {
                let item = &batch.items()[idx];
                item.new.clone().map(|new| CopyPair::new(new, item.old.clone()))
            })
            .collect();
        if mode.contains(MigrateModeFlags::SYNC_NO_COPY) {
            for pair in &pairs {
                page_copy::migrate_page_states(&pair.dst, &pair.src);
            }
        } else {
            self.copy.copy_page_lists(&pairs, copy_mode);
        }
        self.counters.bump(Stage::Copied, pairs.len());

        for &idx in &copying {
            let item = batch.item_mut(idx);
            item.set_state(WorkItemState::Remapping);
            self.retire(item, reason);
            item.set_state(WorkItemState::Migrated);
        }
        copying.len()
    }

    /// Replaces an item's placeholders with slots to its destination, unlocks both frames,
    /// frees the source, and puts the destination on its LRU list.
    fn retire(&self, item: &mut WorkItem, reason: MigrateReason) {
        let detached = Detached { anon_vma: item.anon_vma.take(), was_mapped: item.was_mapped };
        let Some(new) = item.new.take() else {
            error!("BUG: retiring {:?} without a destination", item);
            return;
        };
        self.remap(&item.old, &new, &detached);
        new.unlock();
        drop(detached);
        item.old.unlock();
        self.release_source(&item.old);
        self.finish_destination(&new, reason);
    }
}
