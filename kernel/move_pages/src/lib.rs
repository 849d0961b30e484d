//! Placement of a process's pages on NUMA nodes.
//!
//! This is the interface through which callers ask for specific pages to be moved:
//! * [`System::move_pages()`] takes a list of virtual addresses in some task's address space
//!   and, for each one, a destination node. Contiguous requests bound for the same node
//!   are isolated together and handed to the migration engine as one batch.
//!   Each address gets a status: the node its page is on afterwards, or a negative errno.
//! * Without destination nodes, the same call only reports which node each page is on.
//! * [`System::migrate_misplaced_page()`] moves a single page that was found to be
//!   accessed mostly from another node.

#[macro_use] extern crate log;
extern crate spin;
extern crate bitflags;
extern crate derive_more;
extern crate kernel_config;
extern crate numa_topology;
extern crate memory;
extern crate frame_allocator;
extern crate page_migration;


mod misplaced;
mod placement;
mod stat;
mod task;

pub use placement::{MigrationBatch, MovePagesReport};
pub use task::{Capabilities, Credentials, Pid, Task, TaskTable};

use std::sync::Arc;
use bitflags::bitflags;
use frame_allocator::FrameAllocator;
use memory::MemoryNodes;
use numa_topology::Topology;
use page_migration::{MigrateError, MigrationSettings, Migrator};

bitflags! {
    /// The `flags` argument of [`System::move_pages()`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MoveFlags: i32 {
        /// Move pages that only the target task maps.
        const MOVE        = 1 << 1;
        /// Also move pages that other address spaces map. Requires [`Capabilities::SYS_NICE`].
        const MOVE_ALL    = 1 << 2;
        /// Copy with the DMA offload channel.
        const MOVE_DMA    = 1 << 5;
        /// Copy with the multi-threaded backend.
        const MOVE_MT     = 1 << 6;
        /// Migrate each batch through the concurrent path.
        const MOVE_CONCUR = 1 << 7;
    }
}

/// The outcome of a whole [`System::move_pages()`] request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovePagesResult {
    /// Every address was handled; see the status array for each one's outcome.
    Done,
    /// This many pages were not migrated, counting addresses never attempted.
    NotMigrated(usize),
    /// The request failed as a whole.
    Failed(MigrateError),
}

impl MovePagesResult {
    /// The integer a `move_pages` system call returns for this outcome:
    /// 0, a positive count, or a negative errno.
    pub fn as_raw(self) -> i32 {
        match self {
            MovePagesResult::Done => 0,
            MovePagesResult::NotMigrated(n) => i32::try_from(n).unwrap_or(i32::MAX),
            MovePagesResult::Failed(e) => e.as_status(),
        }
    }
}

/// A machine: its topology, memory, tasks, and migration engine.
pub struct System {
    topology: Arc<Topology>,
    nodes: Arc<MemoryNodes>,
    allocator: Arc<dyn FrameAllocator>,
    migrator: Migrator,
    tasks: TaskTable,
}

impl System {
    pub fn new(
        topology: Topology,
        allocator: Arc<dyn FrameAllocator>,
        settings: MigrationSettings,
    ) -> Result<System, &'static str> {
        let topology = Arc::new(topology);
        let nodes = Arc::new(MemoryNodes::for_topology(&topology));
        let migrator = Migrator::new(topology.clone(), nodes.clone(), allocator.clone(), settings)?;
        Ok(System {
            topology,
            nodes,
            allocator,
            migrator,
            tasks: TaskTable::default(),
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

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    /// Moves the pages at `pages` in the address space of task `pid` (or of `caller`
    /// if `pid` is 0) to the corresponding `nodes`, or, if `nodes` is `None`,
    /// reports which node each page is on.
    ///
    /// `status` must be as long as `pages`, and so must `nodes` if given.
    /// On return, each status entry holds a node id or a negative errno,
    /// for every address that was processed.
    pub fn move_pages(
        &self,
        caller: &Task,
        pid: Pid,
        pages: &[usize],
        nodes: Option<&[i32]>,
        status: &mut [i32],
        flags: i32,
    ) -> MovePagesReport {
        match self.check_request(caller, pid, pages, nodes, status, flags) {
            Ok((target, flags)) => match nodes {
                Some(nodes) => self.do_pages_move(&target, pages, nodes, status, flags),
                None => MovePagesReport::without_batches(self.do_pages_stat(&target, pages, status)),
            },
            Err(e) => MovePagesReport::without_batches(MovePagesResult::Failed(e)),
        }
    }

    /// [`move_pages()`](Self::move_pages) with the raw integer return value of the system call.
    pub fn sys_move_pages(
        &self,
        caller: &Task,
        pid: Pid,
        pages: &[usize],
        nodes: Option<&[i32]>,
        status: &mut [i32],
        flags: i32,
    ) -> i32 {
        self.move_pages(caller, pid, pages, nodes, status, flags).result.as_raw()
    }

    /// Checks the flags and the caller's rights over the target task,
    /// returning the target and the flags to honor.
    fn check_request(
        &self,
        caller: &Task,
        pid: Pid,
        pages: &[usize],
        nodes: Option<&[i32]>,
        status: &[i32],
        flags: i32,
    ) -> Result<(Arc<Task>, MoveFlags), MigrateError> {
        let mut flags = MoveFlags::from_bits(flags).ok_or(MigrateError::Inval)?;
        if status.len() != pages.len() || nodes.is_some_and(|n| n.len() != pages.len()) {
            return Err(MigrateError::Fault);
        }
        if flags.contains(MoveFlags::MOVE_ALL) && !caller.credentials().caps.contains(Capabilities::SYS_NICE) {
            warn!("task {} may not move shared pages, treating MOVE_ALL as MOVE", caller.pid());
            flags.remove(MoveFlags::MOVE_ALL);
            flags.insert(MoveFlags::MOVE);
        }

        let target = if pid == Pid::SELF {
            self.tasks.get(caller.pid()).ok_or(MigrateError::Srch)?
        } else {
            self.tasks.get(pid).ok_or(MigrateError::Srch)?
        };
        if !caller.ptrace_may_access(&target) {
            debug!("task {} may not access task {}", caller.pid(), target.pid());
            return Err(MigrateError::Perm);
        }
        if target.address_space().is_none() {
            return Err(MigrateError::Inval);
        }
        Ok((target, flags))
    }
}
