//! Page migration: moving in-use frames to another node while every slot that maps
//! them stays valid.
//!
//! Migrating a frame goes through these stages:
//! 1. **Unmap/lock**: lock the source frame and replace every slot
//!    that maps it with a migration placeholder.
//! 2. **Mapping transfer**: check that nobody else holds a reference,
//!    then hand the source's identity (owner, index, page-cache slots) to the destination.
//!    This is the point of no return.
//! 3. **Copy**: copy the content and state with the [`page_copy`] engine.
//! 4. **Remap/retire**: replace the placeholders with slots to the destination,
//!    free the source, and put the destination on its LRU list.
//!
//! Two drivers run these stages over a list of isolated frames:
//! * [`Migrator::migrate_pages()`], the serial path, which takes one frame at a time
//!   through every stage and supports every kind of frame.
//! * [`Migrator::migrate_pages_concur()`], the concurrent path, which unmaps a whole batch,
//!   transfers it, copies it with a single call into the copy engine, and remaps it.
//!   Frames it cannot handle are left for the serial path.
//!
//! Both drivers take the list of candidate frames, each of which must have been isolated
//! from its LRU list and counted with [`MemoryNodes::inc_isolated()`].
//! Frames that were migrated or failed permanently are removed from the list;
//! whatever remains must be returned with [`Migrator::putback_movable_pages()`].

#[macro_use] extern crate log;
extern crate spin;
extern crate bitflags;
extern crate derive_more;
extern crate kernel_config;
extern crate numa_topology;
extern crate memory;
extern crate frame_allocator;
extern crate page_copy;

#[cfg(test)]
mod test;

mod concur;
mod error;
mod mode;
mod retire;
mod serial;
mod settings;
mod stats;
mod transfer;
mod unmap;
mod work_item;

pub use error::MigrateError;
pub use mode::{MigrateMode, MigrateModeFlags, MigrateReason, SyncLevel};
pub use settings::MigrationSettings;
pub use stats::{MigrationBreakdown, MigrationEvents};
pub use transfer::expected_page_refs;
pub use work_item::{Batch, WorkItem, WorkItemState};

use std::sync::Arc;
use frame_allocator::FrameAllocator;
use memory::{Frame, MemoryNodes, PageFlags};
use numa_topology::{NodeId, Topology};
use page_copy::{CopyEngine, CopyMode};
use spin::RwLock;
use stats::{Counters, Stage};

/// The migration engine, with the collaborators every migration needs.
pub struct Migrator {
    topology: Arc<Topology>,
    nodes: Arc<MemoryNodes>,
    allocator: Arc<dyn FrameAllocator>,
    copy: CopyEngine,
    settings: RwLock<MigrationSettings>,
    counters: Counters,
}

impl Migrator {
    pub fn new(
        topology: Arc<Topology>,
        nodes: Arc<MemoryNodes>,
        allocator: Arc<dyn FrameAllocator>,
        settings: MigrationSettings,
    ) -> Result<Migrator, &'static str> {
        settings.validate()?;
        let copy = CopyEngine::new(topology.clone(), settings.copy_threads)?;
        Ok(Migrator {
            topology,
            nodes,
            allocator,
            copy,
            settings: RwLock::new(settings),
            counters: Counters::default(),
        })
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn nodes(&self) -> &Arc<MemoryNodes> {
        &self.nodes
    }

    pub fn allocator(&self) -> &Arc<dyn FrameAllocator> {
        &self.allocator
    }

    pub fn copy_engine(&self) -> &CopyEngine {
        &self.copy
    }

    pub fn settings(&self) -> MigrationSettings {
        self.settings.read().clone()
    }

    /// Replaces the runtime settings. `copy_threads` keeps the value the migrator was created with.
    pub fn set_settings(&self, settings: MigrationSettings) -> Result<(), &'static str> {
        settings.validate()?;
        let mut current = self.settings.write();
        let copy_threads = current.copy_threads;
        *current = MigrationSettings { copy_threads, ..settings };
        Ok(())
    }

    pub fn events(&self) -> MigrationEvents {
        self.counters.events()
    }

    pub fn breakdown(&self) -> MigrationBreakdown {
        self.counters.breakdown()
    }

    /// The copy backend to use for a migration in `mode`.
    pub fn copy_mode(&self, mode: MigrateMode) -> CopyMode {
        let settings = self.settings.read();
        let mut copy = mode.copy_mode();
        if settings.accel_page_copy {
            copy |= CopyMode::MT;
        }
        if settings.avoid_remote_pmem_write {
            copy |= CopyMode::AVOID_REMOTE_WRITE;
        }
        copy
    }

    /// Allocates a destination for `old` on `node`, with the same extent and kind.
    fn allocate_destination(&self, old: &Frame, node: NodeId) -> Option<Arc<Frame>> {
        let new = self.allocator.allocate_frame(node, old.nr_pages())?;
        if old.is_hugetlb() {
            new.set_flags(PageFlags::HUGETLB);
        }
        Some(new)
    }

    /// Copies content (unless the mode leaves that to the caller) and state of one pair.
    fn copy_one(&self, new: &Arc<Frame>, old: &Arc<Frame>, mode: MigrateMode) {
        if mode.contains(MigrateModeFlags::SYNC_NO_COPY) {
            page_copy::migrate_page_states(new, old);
        } else {
            self.copy.copy_page(new, old, self.copy_mode(mode));
        }
        self.counters.bump(Stage::Copied, 1);
    }
}
