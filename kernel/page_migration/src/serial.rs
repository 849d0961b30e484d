//! The serial path: one frame at a time through every stage.

use std::sync::Arc;
use kernel_config::migration::FORCE_AFTER_PASS;
use memory::{split_huge_frame, FileMapping, Frame, PageFlags, RelocateFrame};
use numa_topology::NodeId;
use crate::{MigrateError, MigrateMode, MigrateReason, Migrator, SyncLevel};

impl Migrator {
    /// Migrates every frame on `from` to `node`, one at a time.
    ///
    /// Frames that fail with a retryable error stay on `from` and are retried in the
    /// next pass, up to [`MigrationSettings::serial_passes`](crate::MigrationSettings) passes;
    /// passes after the first few may block on page locks.
    /// If no destination can be allocated for a transparent huge frame, it is split into
    /// base frames, which are appended to `from`. For any other frame, allocation
    /// failure ends the whole call, leaving the rest of `from` untouched
    /// and counted as not migrated.
    ///
    /// Migrated and permanently failed frames are removed from `from`.
    /// Returns the number of frames that were not migrated.
    pub fn migrate_pages(
        &self,
        from: &mut Vec<Arc<Frame>>,
        node: NodeId,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> usize {
        let passes = self.settings.read().serial_passes;
        let mut nr_failed = 0;
        let mut nr_succeeded = 0;
        let mut retry = 1;
        let mut out_of_memory = false;

        let mut pass = 0;
        'passes: while pass < passes && retry > 0 {
            retry = 0;
            let force = pass > FORCE_AFTER_PASS;
            let mut i = 0;
            while i < from.len() {
                let frame = from[i].clone();
                match self.unmap_and_move(&frame, node, force, mode, reason) {
                    Ok(()) => {
                        from.remove(i);
                        nr_succeeded += 1;
                    }
                    Err(MigrateError::Again) => {
                        retry += 1;
                        i += 1;
                    }
                    Err(MigrateError::NoMem) => {
                        if frame.is_transhuge() {
                            match self.split_for_retry(&frame) {
                                // retry the head right away, the tails after the rest of the list
                                Ok(tails) => {
                                    from.extend(tails);
                                    continue;
                                }
                                Err(e) => warn!("cannot split {:?}: {}", frame, e),
                            }
                        }
                        out_of_memory = true;
                        break 'passes;
                    }
                    Err(e) => {
                        trace!("{:?} failed permanently: {}", frame.pfn(), e);
                        from.remove(i);
                        nr_failed += 1;
                    }
                }
            }
            pass += 1;
        }
        // everything still listed was not migrated: frames waiting for a retry and,
        // after an allocation failure, every frame from the failing one on
        nr_failed += from.len();
        if out_of_memory {
            warn!("migrate_pages to node {}: out of memory with {} frames left", node, from.len());
        }

        self.counters.count_events(nr_succeeded, nr_failed);
        debug!("migrate_pages to node {}: {} migrated, {} failed, {} passes", node, nr_succeeded, nr_failed, pass);
        nr_failed
    }

    fn split_for_retry(&self, frame: &Arc<Frame>) -> Result<Vec<Arc<Frame>>, &'static str> {
        frame.lock();
        let result = split_huge_frame(frame);
        frame.unlock();
        result
    }

    /// Migrates one isolated frame, allocating its destination on `node`.
    ///
    /// Unless the error is retryable or an allocation failure, the frame's isolation
    /// has ended when this returns: it was either freed or put back on its LRU list.
    fn unmap_and_move(
        &self,
        old: &Arc<Frame>,
        node: NodeId,
        force: bool,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> Result<(), MigrateError> {
        if old.ref_count() == 1 {
            // freed from under us: only our isolation reference is left
            old.clear_flags(PageFlags::ACTIVE | PageFlags::UNEVICTABLE);
            self.release_source(old);
            return Ok(());
        }

        let new = self.allocate_destination(old, node).ok_or(MigrateError::NoMem)?;
        let rc = self.unmap_and_move_locked(old, &new, force, mode, reason);
        match rc {
            Ok(()) => {
                self.finish_destination(&new, reason);
                self.release_source(old);
            }
            Err(e) => {
                if e != MigrateError::Again {
                    self.putback_source(old);
                }
                self.free_destination(new);
            }
        }
        rc
    }

    fn unmap_and_move_locked(
        &self,
        old: &Arc<Frame>,
        new: &Arc<Frame>,
        force: bool,
        mode: MigrateMode,
        reason: MigrateReason,
    ) -> Result<(), MigrateError> {
        self.lock_source(old, force, mode, reason)?;
        let rc = match self.detach(old, new) {
            Ok(detached) => {
                let rc = if old.is_mapped() {
                    Err(MigrateError::Again)
                } else {
                    self.move_to_new_page(new, old, mode)
                };
                self.remap(old, if rc.is_ok() { new } else { old }, &detached);
                new.unlock();
                drop(detached);
                rc
            }
            Err(e) => Err(e),
        };
        old.unlock();
        rc
    }

    /// Moves the identity, content, and state of the locked, detached `old` to `new`,
    /// the way `old`'s owner requires.
    fn move_to_new_page(&self, new: &Arc<Frame>, old: &Arc<Frame>, mode: MigrateMode) -> Result<(), MigrateError> {
        let rc = match old.mapping() {
            None => self.migrate_page(None, new, old, mode),
            Some(mapping) => match mapping.relocate_ops().cloned() {
                Some(ops) => self.relocate_page(&mapping, ops.as_ref(), new, old, mode),
                None => self.fallback_migrate_page(&mapping, new, old, mode),
            },
        };
        // anonymous frames keep their owner until they are freed
        if rc.is_ok() && !old.is_anon() {
            old.clear_owner();
        }
        rc
    }

    /// The generic path, for frames without private metadata.
    fn migrate_page(
        &self,
        mapping: Option<&Arc<FileMapping>>,
        new: &Arc<Frame>,
        old: &Arc<Frame>,
        mode: MigrateMode,
    ) -> Result<(), MigrateError> {
        self.move_mapping(mapping, new, old, 0)?;
        self.copy_one(new, old, mode);
        Ok(())
    }

    /// The path for frames whose mapping supplies its own relocation callback.
    fn relocate_page(
        &self,
        mapping: &Arc<FileMapping>,
        ops: &dyn RelocateFrame,
        new: &Arc<Frame>,
        old: &Arc<Frame>,
        mode: MigrateMode,
    ) -> Result<(), MigrateError> {
        ops.prepare(old, mode.sync != SyncLevel::Async)?;
        self.move_mapping(Some(mapping), new, old, 0)?;
        ops.transfer(new, old);
        self.copy_one(new, old, mode);
        Ok(())
    }

    /// The path for file frames whose mapping has no relocation callback.
    fn fallback_migrate_page(
        &self,
        mapping: &Arc<FileMapping>,
        new: &Arc<Frame>,
        old: &Arc<Frame>,
        mode: MigrateMode,
    ) -> Result<(), MigrateError> {
        if old.is_dirty() {
            // only full synchronous migration writes frames back
            if mode.sync != SyncLevel::Sync {
                return Err(MigrateError::Busy);
            }
            return Err(self.writeout(mapping, old));
        }
        if old.has_private() && !old.try_release_private() {
            return Err(if mode.sync == SyncLevel::Sync { MigrateError::Again } else { MigrateError::Busy });
        }
        self.migrate_page(Some(mapping), new, old, mode)
    }

    /// Writes a dirty frame back so that a later attempt finds it clean.
    /// The current attempt cannot succeed either way.
    fn writeout(&self, mapping: &FileMapping, old: &Frame) -> MigrateError {
        if !mapping.writepage(old, &self.nodes) {
            trace!("{:?} was already written back by someone else", old.pfn());
        }
        MigrateError::Again
    }
}
