//! Migration of a single page that is mostly accessed from another node.

use std::sync::Arc;
use kernel_config::memory::MISPLACED_WATERMARK_PAGES;
use memory::{Frame, Vma};
use numa_topology::NodeId;
use page_migration::{MigrateMode, MigrateReason};
use crate::System;

impl System {
    /// Whether `node` can take `nr_pages` more frames and still keep its reserve.
    fn migrate_balanced_node(&self, node: NodeId, nr_pages: usize) -> bool {
        self.allocator.free_pages(node) >= nr_pages + MISPLACED_WATERMARK_PAGES
    }

    /// Isolates `frame` for migration to `node`, if that node has room for it.
    fn numamigrate_isolate_page(&self, frame: &Arc<Frame>, node: NodeId) -> bool {
        if !self.migrate_balanced_node(node, frame.nr_pages()) {
            return false;
        }
        if self.nodes.isolate_lru_page(frame).is_err() {
            return false;
        }
        // a huge frame must have no user besides its one slot and the isolation
        if frame.is_transhuge() && frame.ref_count() != 2 {
            self.nodes.putback_lru_page(frame);
            return false;
        }
        self.nodes.inc_isolated(frame);
        true
    }

    /// Moves `frame`, which `vma` maps, to `node` without blocking.
    ///
    /// Skipped for dirty file frames, and for file frames that several address spaces map
    /// executable (likely shared libraries). Returns `true` if the frame was migrated.
    pub fn migrate_misplaced_page(&self, frame: &Arc<Frame>, vma: &Vma, node: NodeId) -> bool {
        if frame.map_count() != 1 && frame.is_file_cache() && vma.is_executable() {
            return false;
        }
        if frame.is_file_cache() && frame.is_dirty() {
            return false;
        }
        if !self.numamigrate_isolate_page(frame, node) {
            return false;
        }

        let mut list = vec![frame.clone()];
        let remaining = self.migrator.migrate_pages(&mut list, node, MigrateMode::ASYNC, MigrateReason::NumaMisplaced);
        if remaining > 0 {
            self.migrator.putback_movable_pages(&mut list);
            trace!("misplaced {:?} stays on node {}", frame.pfn(), frame.node());
            return false;
        }
        true
    }
}
