//! Groups (address, node) requests into batches and runs each batch through the engine.

use std::sync::Arc;
use memory::{AddressSpace, Frame};
use numa_topology::{NodeId, NodeMask, NodeStates};
use page_migration::{MigrateError, MigrateMode, MigrateModeFlags, MigrateReason, MigrationBreakdown};
use crate::{MoveFlags, MovePagesResult, System, Task};

/// One call into the migration engine made while serving a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationBatch {
    pub node: NodeId,
    /// The number of frames isolated for this batch.
    pub nr_frames: usize,
}

/// What a [`System::move_pages()`] request did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovePagesReport {
    pub result: MovePagesResult,
    /// The batches handed to the migration engine, in order.
    pub batches: Vec<MigrationBatch>,
    /// How many items went through each stage of the engine during the request.
    /// Includes the work of any request that ran at the same time.
    pub breakdown: MigrationBreakdown,
}

impl MovePagesReport {
    pub(crate) fn without_batches(result: MovePagesResult) -> MovePagesReport {
        MovePagesReport { result, batches: Vec::new(), breakdown: MigrationBreakdown::default() }
    }
}

/// Sets `count` status entries starting at `start` to `node`.
fn store_status(status: &mut [i32], start: usize, node: NodeId, count: usize) {
    for entry in &mut status[start .. start + count] {
        *entry = node.as_raw();
    }
}

impl System {
    pub(crate) fn do_pages_move(
        &self,
        task: &Task,
        pages: &[usize],
        nodes: &[i32],
        status: &mut [i32],
        flags: MoveFlags,
    ) -> MovePagesReport {
        let before = self.migrator.breakdown();
        let mut batches = Vec::new();
        let result = match task.address_space() {
            Some(mm) => self.move_to_nodes(mm, task.mems_allowed(), pages, nodes, status, flags, &mut batches),
            None => MovePagesResult::Failed(MigrateError::Inval),
        };
        MovePagesReport { result, batches, breakdown: self.migrator.breakdown().since(&before) }
    }

    /// Walks the requests in order, isolating pages into the current batch until the
    /// destination changes or a request fails, at which point the batch is migrated.
    ///
    /// A batch that leaves pages unmigrated ends the whole request; the count returned
    /// then includes every request that was not attempted.
    #[allow(clippy::too_many_arguments)]
    fn move_to_nodes(
        &self,
        mm: &AddressSpace,
        allowed: NodeMask,
        pages: &[usize],
        nodes: &[i32],
        status: &mut [i32],
        flags: MoveFlags,
        batches: &mut Vec<MigrationBatch>,
    ) -> MovePagesResult {
        let nr = pages.len();
        let migrate_all = flags.contains(MoveFlags::MOVE_ALL);
        let mut pagelist: Vec<Arc<Frame>> = Vec::new();
        let mut current: Option<NodeId> = None;
        let mut start = 0;
        let mut end = nr;
        let mut fatal = None;

        for i in 0..nr {
            let node = match self.check_node(nodes[i], allowed) {
                Ok(node) => node,
                Err(e) => {
                    fatal = Some(e);
                    end = i;
                    break;
                }
            };

            match current {
                None => {
                    current = Some(node);
                    start = i;
                }
                Some(cur) if cur != node => {
                    let failed = self.do_move_pages_to_node(&mut pagelist, cur, flags, batches);
                    if failed > 0 {
                        return MovePagesResult::NotMigrated(failed + nr - i);
                    }
                    store_status(status, start, cur, i - start);
                    start = i;
                    current = Some(node);
                }
                Some(_) => { }
            }

            match self.add_page_for_migration(mm, pages[i], node, &mut pagelist, migrate_all) {
                Ok(false) => {
                    status[i] = node.as_raw();
                    continue;
                }
                Ok(true) => continue,
                Err(e) => status[i] = e.as_status(),
            }

            // a failed request ends the current batch
            let failed = self.do_move_pages_to_node(&mut pagelist, node, flags, batches);
            if failed > 0 {
                return MovePagesResult::NotMigrated(failed + nr - i - 1);
            }
            if i > start {
                store_status(status, start, node, i - start);
            }
            current = None;
        }

        if let Some(cur) = current.filter(|_| !pagelist.is_empty()) {
            let failed = self.do_move_pages_to_node(&mut pagelist, cur, flags, batches);
            if fatal.is_none() && failed > 0 {
                return MovePagesResult::NotMigrated(failed);
            }
            if failed == 0 {
                store_status(status, start, cur, end - start);
            }
        }
        match fatal {
            Some(e) => MovePagesResult::Failed(e),
            None => MovePagesResult::Done,
        }
    }

    /// Checks a raw destination node of a request.
    fn check_node(&self, raw: i32, allowed: NodeMask) -> Result<NodeId, MigrateError> {
        let node = NodeId::from_raw(raw).ok_or(MigrateError::NoDev)?;
        if !self.topology.node_has_state(node, NodeStates::MEMORY) {
            return Err(MigrateError::NoDev);
        }
        if !allowed.contains(node) {
            return Err(MigrateError::Access);
        }
        Ok(node)
    }

    /// Resolves `addr` to its frame and, unless it is already on `node`,
    /// isolates it onto `pagelist`.
    ///
    /// Returns `Ok(true)` if the frame was queued and `Ok(false)` if it is already in place.
    fn add_page_for_migration(
        &self,
        mm: &AddressSpace,
        addr: usize,
        node: NodeId,
        pagelist: &mut Vec<Arc<Frame>>,
        migrate_all: bool,
    ) -> Result<bool, MigrateError> {
        mm.find_vma(addr)
            .filter(|vma| vma.is_migratable())
            .ok_or(MigrateError::Fault)?;
        let frame = mm.follow_page(addr).ok_or(MigrateError::NoEnt)?;
        if frame.node() == node {
            return Ok(false);
        }
        if frame.map_count() > 1 && !migrate_all {
            return Err(MigrateError::Access);
        }
        // already isolated, e.g., through another address of the same huge unit
        self.nodes.isolate_lru_page(&frame).map_err(|_| MigrateError::Busy)?;
        self.nodes.inc_isolated(&frame);
        pagelist.push(frame);
        Ok(true)
    }

    /// Migrates every frame on `pagelist` to `node`, putting back whatever is left.
    /// Returns the number of frames that were not migrated.
    fn do_move_pages_to_node(
        &self,
        pagelist: &mut Vec<Arc<Frame>>,
        node: NodeId,
        flags: MoveFlags,
        batches: &mut Vec<MigrationBatch>,
    ) -> usize {
        if pagelist.is_empty() {
            return 0;
        }
        let mut mode = MigrateMode::SYNC;
        if flags.contains(MoveFlags::MOVE_MT) {
            mode = mode.with(MigrateModeFlags::MT);
        }
        if flags.contains(MoveFlags::MOVE_DMA) {
            mode = mode.with(MigrateModeFlags::DMA);
        }
        batches.push(MigrationBatch { node, nr_frames: pagelist.len() });

        let failed = if flags.contains(MoveFlags::MOVE_CONCUR) {
            self.migrator.migrate_pages_concur(pagelist, node, mode, MigrateReason::Syscall)
        } else {
            self.migrator.migrate_pages(pagelist, node, mode, MigrateReason::Syscall)
        };
        if !pagelist.is_empty() {
            self.migrator.putback_movable_pages(pagelist);
        }
        debug!("batch to node {}: {} frames not migrated", node, failed);
        failed
    }
}
