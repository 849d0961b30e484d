//! Tests for both migration drivers over anonymous, file-backed, and huge frames.

extern crate std;

use self::std::{dbg, vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};
use frame_allocator::NodeFrameAllocator;
use kernel_config::memory::PAGE_SIZE;
use memory::{AddressSpace, FileMapping, NodeStatItem, RelocateError, RelocateFrame, SlotFlags};

use super::*;

const BASE: usize = 0x4000_0000;
const NODE0: NodeId = NodeId::new(0);
const NODE1: NodeId = NodeId::new(1);

struct Env {
    nodes: Arc<MemoryNodes>,
    allocator: Arc<NodeFrameAllocator>,
    migrator: Migrator,
}

fn env_with(capacities: &[usize]) -> Env {
    let topology = Arc::new(Topology::uniform(capacities.len(), 2).unwrap());
    let nodes = Arc::new(MemoryNodes::for_topology(&topology));
    let allocator = Arc::new(NodeFrameAllocator::new(capacities).unwrap());
    let migrator = Migrator::new(topology, nodes.clone(), allocator.clone(), MigrationSettings::default()).unwrap();
    Env { nodes, allocator, migrator }
}

fn env() -> Env {
    env_with(&[2048, 2048])
}

fn isolate(env: &Env, frame: &Arc<Frame>) {
    env.nodes.isolate_lru_page(frame).unwrap();
    env.nodes.inc_isolated(frame);
}

/// Faults in `nr` base frames on node 0 in a fresh anonymous area, writes a distinct
/// byte to each, and isolates them.
fn isolated_anon_frames(env: &Env, nr: usize) -> (Arc<AddressSpace>, Vec<Arc<Frame>>) {
    let space = AddressSpace::new();
    space.mmap_anon(BASE, nr, true).unwrap();
    let mut frames = Vec::new();
    for i in 0..nr {
        let addr = BASE + i * PAGE_SIZE;
        let frame = env.allocator.allocate_frame(NODE0, 1).unwrap();
        space.install_new_frame(addr, &frame, &env.nodes).unwrap();
        space.write(addr + 8, &[0xa0 + i as u8]).unwrap();
        isolate(env, &frame);
        frames.push(frame);
    }
    (space, frames)
}

fn byte_at(space: &AddressSpace, addr: usize) -> u8 {
    let mut byte = [0u8];
    space.read(addr, &mut byte).unwrap();
    byte[0]
}

fn node_at(space: &AddressSpace, addr: usize) -> NodeId {
    space.follow_page(addr).unwrap().node()
}

/// Caches one frame on node 0 at file offset `index` of `mapping`, on the LRU list,
/// with only the page-cache reference left.
fn cached_frame(env: &Env, mapping: &Arc<FileMapping>, index: usize, dirty: bool) -> Arc<Frame> {
    let frame = env.allocator.allocate_frame(NODE0, 1).unwrap();
    frame.write(0, b"file page").unwrap();
    frame.set_flags(PageFlags::UPTODATE);
    if dirty {
        frame.set_flags(PageFlags::DIRTY);
    }
    mapping.add_frame(&frame, index, &env.nodes).unwrap();
    env.nodes.lru_add(&frame);
    frame.put();
    frame
}

/// Moves private metadata from the source to the destination, like a filesystem
/// that attaches buffers to its cached frames.
#[derive(Default)]
struct BufferMover {
    prepared: AtomicUsize,
    transferred: AtomicUsize,
    refuse: AtomicUsize,
}

impl RelocateFrame for BufferMover {
    fn prepare(&self, _src: &Frame, may_block: bool) -> Result<(), RelocateError> {
        self.prepared.fetch_add(1, Ordering::Relaxed);
        if self.refuse.load(Ordering::Relaxed) > 0 {
            return Err(if may_block { RelocateError::Again } else { RelocateError::Busy });
        }
        Ok(())
    }

    fn transfer(&self, dst: &Frame, src: &Frame) {
        let buffers = src.detach_private();
        dst.attach_private(buffers);
        self.transferred.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn serial_migrates_anon_frames() {
    let env = env();
    let (space, frames) = isolated_anon_frames(&env, 4);
    let mut from = frames.clone();

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(failed, 0);
    assert!(from.is_empty());

    for i in 0..4 {
        let addr = BASE + i * PAGE_SIZE;
        let new = space.follow_page(addr).unwrap();
        assert_eq!(new.node(), NODE1);
        assert_eq!(byte_at(&space, addr + 8), 0xa0 + i as u8);
        assert!(new.test_flags(PageFlags::DIRTY));
        assert!(new.test_flags(PageFlags::LRU));
        assert_eq!(new.last_migrate_reason(), Some(MigrateReason::Syscall.code()));
        assert!(space.slot(addr).unwrap().flags().contains(SlotFlags::WRITABLE));
    }
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
    assert_eq!(env.allocator.allocated_pages(NODE0), 0);
    assert_eq!(env.allocator.allocated_pages(NODE1), 4);
    assert_eq!(env.migrator.events(), MigrationEvents { pgmigrate_success: 4, pgmigrate_fail: 0 });
}

#[test]
fn concurrent_path_migrates_a_batch() {
    let env = env();
    let (space, frames) = isolated_anon_frames(&env, 4);
    let mut from = frames.clone();
    let before = env.migrator.breakdown();

    let failed = env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(failed, 0);
    assert!(from.is_empty());
    for i in 0..4 {
        assert_eq!(node_at(&space, BASE + i * PAGE_SIZE), NODE1);
        assert_eq!(byte_at(&space, BASE + i * PAGE_SIZE + 8), 0xa0 + i as u8);
    }

    let stages = env.migrator.breakdown().since(&before);
    dbg!(&stages);
    assert_eq!(stages.unmapped, 4);
    assert_eq!(stages.mappings_changed, 4);
    assert_eq!(stages.units_copied, 4);
    assert_eq!(stages.remapped, 4);
    assert_eq!(stages.delegated, 0);
    // the whole batch went through the multi-threaded backend in one call
    assert_eq!(env.migrator.copy_engine().counters().mt_units, 4);
    assert_eq!(env.migrator.events().pgmigrate_success, 4);
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
}

#[test]
fn plain_copy_when_acceleration_is_off() {
    let env = env();
    env.migrator.set_settings(MigrationSettings { accel_page_copy: false, ..Default::default() }).unwrap();
    let (space, frames) = isolated_anon_frames(&env, 2);
    let mut from = frames.clone();

    assert_eq!(env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall), 0);
    let counters = env.migrator.copy_engine().counters();
    assert_eq!(counters.mt_units, 0);
    assert_eq!(counters.plain_units, 2);
    assert_eq!(byte_at(&space, BASE + PAGE_SIZE + 8), 0xa1);
}

#[test]
fn extra_reference_keeps_the_frame_in_place() {
    for concurrent in [false, true] {
        let env = env();
        let (space, frames) = isolated_anon_frames(&env, 1);
        let pinned = frames[0].clone();
        pinned.get();
        // its slot, the isolation, and the pin
        assert_eq!(pinned.ref_count(), 3);
        let mut from = frames.clone();

        let failed = if concurrent {
            env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        } else {
            env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        };
        assert_eq!(failed, 1);
        assert_eq!(from.len(), 1, "retryable failures stay on the list");
        assert_eq!(pinned.ref_count(), 3, "concurrent: {}", concurrent);
        assert_eq!(pinned.map_count(), 1);
        assert!(!pinned.is_locked());
        assert!(Arc::ptr_eq(&space.follow_page(BASE).unwrap(), &pinned));
        assert!(space.slot(BASE).unwrap().flags().contains(SlotFlags::WRITABLE));
        assert_eq!(byte_at(&space, BASE + 8), 0xa0);
        // every attempt's destination was given back
        assert_eq!(env.allocator.allocated_pages(NODE1), 0);

        pinned.put();
        env.migrator.putback_movable_pages(&mut from);
        assert!(from.is_empty());
        assert_eq!(pinned.ref_count(), 1);
        assert_eq!(env.nodes.nr_isolated(NODE0), 0);
        assert!(env.nodes.node(NODE0).unwrap().lru_contains(&pinned));
        assert_eq!(env.migrator.events(), MigrationEvents { pgmigrate_success: 0, pgmigrate_fail: 1 });
    }
}

#[test]
fn restored_items_end_up_on_the_serial_path() {
    let env = env();
    let (space, frames) = isolated_anon_frames(&env, 3);
    frames[1].get();
    let mut from = frames.clone();

    let failed = env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(failed, 1);
    assert_eq!(from.len(), 1);
    assert!(Arc::ptr_eq(&from[0], &frames[1]));
    assert_eq!(node_at(&space, BASE), NODE1);
    assert_eq!(node_at(&space, BASE + PAGE_SIZE), NODE0);
    assert_eq!(node_at(&space, BASE + 2 * PAGE_SIZE), NODE1);
    assert_eq!(byte_at(&space, BASE + PAGE_SIZE + 8), 0xa1);

    frames[1].put();
    env.migrator.putback_movable_pages(&mut from);
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
}

#[test]
fn file_frame_with_relocation_callback() {
    let env = env();
    let mover = Arc::new(BufferMover::default());
    let mapping = FileMapping::new(Some(mover.clone()), true);
    let old = cached_frame(&env, &mapping, 3, false);
    old.attach_private(0xb0f);
    let space = AddressSpace::new();
    space.mmap_file(BASE, 8, &mapping, 0, false).unwrap();
    space.map_frame(BASE + 3 * PAGE_SIZE, &old).unwrap();
    isolate(&env, &old);
    let mut from = vec![old.clone()];

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Compaction);
    assert_eq!(failed, 0);
    assert_eq!(mover.prepared.load(Ordering::Relaxed), 1);
    assert_eq!(mover.transferred.load(Ordering::Relaxed), 1);

    let new = mapping.find_frame(3).unwrap();
    assert_eq!(new.node(), NODE1);
    assert_eq!(new.private(), 0xb0f);
    assert!(new.has_private());
    assert!(Arc::ptr_eq(&space.follow_page(BASE + 3 * PAGE_SIZE).unwrap(), &new));
    let mut buf = [0u8; 9];
    new.read(0, &mut buf).unwrap();
    assert_eq!(&buf, b"file page");
    // page cache, private metadata, and one slot
    assert_eq!(new.ref_count(), 3);
    assert_eq!(env.nodes.state(NODE0, NodeStatItem::FilePages), 0);
    assert_eq!(env.nodes.state(NODE1, NodeStatItem::FilePages), 1);
    assert_eq!(env.allocator.allocated_pages(NODE0), 0);
}

#[test]
fn relocation_callback_can_refuse() {
    let env = env();
    let mover = Arc::new(BufferMover::default());
    mover.refuse.store(1, Ordering::Relaxed);
    let mapping = FileMapping::new(Some(mover.clone()), true);
    let old = cached_frame(&env, &mapping, 0, false);
    isolate(&env, &old);
    let mut from = vec![old.clone()];

    // asynchronous migration may not wait for the callback's private state
    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::ASYNC, MigrateReason::Compaction);
    assert_eq!(failed, 1);
    assert!(from.is_empty(), "busy frames fail permanently");
    assert!(Arc::ptr_eq(&mapping.find_frame(0).unwrap(), &old));
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
    assert_eq!(env.migrator.breakdown().put_back, 1);
}

#[test]
fn file_frames_are_delegated_by_the_concurrent_path() {
    let env = env();
    let mapping = FileMapping::new(None, true);
    let old = cached_frame(&env, &mapping, 0, false);
    isolate(&env, &old);
    let mut from = vec![old.clone()];

    let failed = env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(failed, 0);
    assert!(from.is_empty());
    assert_eq!(env.migrator.breakdown().delegated, 1);
    assert_eq!(mapping.find_frame(0).unwrap().node(), NODE1);
}

#[test]
fn dirty_file_frame_is_written_back_first() {
    let env = env();
    let mapping = FileMapping::new(None, true);
    let old = cached_frame(&env, &mapping, 0, true);
    assert_eq!(env.nodes.state(NODE0, NodeStatItem::FileDirty), 1);
    isolate(&env, &old);
    let mut from = vec![old.clone()];

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(failed, 0);
    assert_eq!(mapping.writeouts(), 1);
    let new = mapping.find_frame(0).unwrap();
    assert_eq!(new.node(), NODE1);
    assert!(!new.is_dirty());
    assert!(new.test_flags(PageFlags::MAPPEDTODISK));
    assert_eq!(env.nodes.state(NODE0, NodeStatItem::FileDirty), 0);
    assert_eq!(env.nodes.state(NODE1, NodeStatItem::FileDirty), 0);
}

#[test]
fn dirty_file_frame_is_busy_without_full_sync() {
    let env = env();
    let mapping = FileMapping::new(None, true);
    let old = cached_frame(&env, &mapping, 0, true);
    isolate(&env, &old);
    let mut from = vec![old.clone()];

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC_LIGHT, MigrateReason::Syscall);
    assert_eq!(failed, 1);
    assert!(from.is_empty());
    assert_eq!(mapping.writeouts(), 0);
    assert!(old.is_dirty());
    assert!(env.nodes.node(NODE0).unwrap().lru_contains(&old));
}

#[test]
fn writeback_is_busy_in_async_mode() {
    let env = env();
    let (space, frames) = isolated_anon_frames(&env, 1);
    frames[0].set_writeback();
    let mut from = frames.clone();

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::ASYNC, MigrateReason::NumaMisplaced);
    assert_eq!(failed, 1);
    assert!(from.is_empty());
    assert_eq!(node_at(&space, BASE), NODE0);
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
}

#[test]
fn huge_frame_is_split_when_no_huge_destination_fits() {
    // node 1 has room for three base frames, but not for the four-page unit
    let env = env_with(&[64, 3]);
    let space = AddressSpace::new();
    space.mmap_anon(BASE, 4, true).unwrap();
    let huge = env.allocator.allocate_frame(NODE0, 4).unwrap();
    space.install_new_frame(BASE, &huge, &env.nodes).unwrap();
    for i in 0..4 {
        space.write(BASE + i * PAGE_SIZE, &[i as u8 + 1]).unwrap();
    }
    isolate(&env, &huge);
    assert_eq!(env.nodes.nr_isolated(NODE0), 4);
    let mut from = vec![huge.clone()];

    let failed = env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    dbg!(&from);
    assert_eq!(failed, 1);
    assert_eq!(from.len(), 1, "the frame that did not fit stays on the list");
    assert_eq!(from[0].index(), BASE / PAGE_SIZE + 3);
    for i in 0..3 {
        assert_eq!(node_at(&space, BASE + i * PAGE_SIZE), NODE1);
    }
    assert_eq!(node_at(&space, BASE + 3 * PAGE_SIZE), NODE0);
    for i in 0..4 {
        assert_eq!(byte_at(&space, BASE + i * PAGE_SIZE), i as u8 + 1);
    }

    env.migrator.putback_movable_pages(&mut from);
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
    assert_eq!(env.allocator.allocated_pages(NODE0), 1);
}

#[test]
fn huge_frame_without_destination_is_delegated() {
    let env = env_with(&[64, 64]);
    let space = AddressSpace::new();
    space.mmap_anon(BASE, 4, true).unwrap();
    let huge = env.allocator.allocate_frame(NODE0, 4).unwrap();
    space.install_new_frame(BASE, &huge, &env.nodes).unwrap();
    space.write(BASE + 2 * PAGE_SIZE, &[9]).unwrap();
    isolate(&env, &huge);
    // the first allocation, for the whole unit, fails
    env.allocator.fail_after(NODE1, 0);
    let mut from = vec![huge.clone()];

    let failed = env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall);
    assert_eq!(env.migrator.breakdown().delegated, 1);
    // the serial path splits it, but base frames do not fit either
    assert_eq!(failed, 4);
    assert_eq!(from.len(), 4);
    assert_eq!(byte_at(&space, BASE + 2 * PAGE_SIZE), 9);

    env.allocator.clear_failures();
    assert_eq!(env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall), 0);
    assert!(from.is_empty());
    assert_eq!(node_at(&space, BASE + 2 * PAGE_SIZE), NODE1);
    assert_eq!(byte_at(&space, BASE + 2 * PAGE_SIZE), 9);
    assert_eq!(env.nodes.nr_isolated(NODE0), 0);
}

#[test]
fn allocation_failure_aborts_the_rest_of_the_batch() {
    for concurrent in [false, true] {
        let env = env();
        let (space, frames) = isolated_anon_frames(&env, 4);
        env.allocator.fail_after(NODE1, 2);
        let mut from = frames.clone();

        let failed = if concurrent {
            env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        } else {
            env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        };
        // the failing frame and the one after it, which was never attempted
        assert_eq!(failed, 2, "concurrent: {}", concurrent);
        assert_eq!(from.len(), 2);
        assert!(Arc::ptr_eq(&from[0], &frames[2]));
        assert!(Arc::ptr_eq(&from[1], &frames[3]));
        assert_eq!(node_at(&space, BASE), NODE1);
        assert_eq!(node_at(&space, BASE + PAGE_SIZE), NODE1);
        assert_eq!(node_at(&space, BASE + 2 * PAGE_SIZE), NODE0);
        assert_eq!(node_at(&space, BASE + 3 * PAGE_SIZE), NODE0);
        assert_eq!(env.migrator.events().pgmigrate_fail, 2);

        env.migrator.putback_movable_pages(&mut from);
        assert_eq!(env.nodes.nr_isolated(NODE0), 0);
    }
}

#[test]
fn frame_freed_while_isolated() {
    for concurrent in [false, true] {
        let env = env();
        let (space, frames) = isolated_anon_frames(&env, 1);
        assert!(matches!(space.unmap(BASE).unwrap(), memory::UnmapResult::NonExclusive(_)));
        assert_eq!(frames[0].ref_count(), 1);
        let mut from = frames.clone();

        let failed = if concurrent {
            env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        } else {
            env.migrator.migrate_pages(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall)
        };
        assert_eq!(failed, 0);
        assert!(from.is_empty());
        assert_eq!(env.allocator.allocated_pages(NODE0), 0);
        assert_eq!(env.allocator.allocated_pages(NODE1), 0);
        assert_eq!(env.nodes.nr_isolated(NODE0), 0);
        assert_eq!(env.migrator.events().pgmigrate_success, 1);
    }
}

#[test]
fn no_copy_mode_moves_mappings_only() {
    let env = env();
    let (space, frames) = isolated_anon_frames(&env, 1);
    let mut from = frames.clone();
    let mode = MigrateMode::SYNC.with(MigrateModeFlags::SYNC_NO_COPY);

    assert_eq!(env.migrator.migrate_pages(&mut from, NODE1, mode, MigrateReason::Syscall), 0);
    let new = space.follow_page(BASE).unwrap();
    assert_eq!(new.node(), NODE1);
    assert!(new.test_flags(PageFlags::DIRTY));
    // the caller copies the content itself
    assert_eq!(byte_at(&space, BASE + 8), 0);
}

#[test]
fn shared_frame_keeps_all_mappings() {
    let env = env();
    let (parent, frames) = isolated_anon_frames(&env, 1);
    let child = parent.fork();
    let mut from = frames.clone();

    assert_eq!(env.migrator.migrate_pages_concur(&mut from, NODE1, MigrateMode::SYNC, MigrateReason::Syscall), 0);
    let new = parent.follow_page(BASE).unwrap();
    assert!(Arc::ptr_eq(&new, &child.follow_page(BASE).unwrap()));
    assert_eq!(new.map_count(), 2);
    assert_eq!(new.ref_count(), 2);
    assert_eq!(byte_at(&child, BASE + 8), 0xa0);
}

#[test]
fn expected_refs_of_anon_and_file_frames() {
    let env = env();
    let anon = env.allocator.allocate_frame(NODE0, 1).unwrap();
    assert_eq!(expected_page_refs(None, &anon), 1);

    let mapping = FileMapping::new(None, false);
    let file = env.allocator.allocate_frame(NODE0, 4).unwrap();
    mapping.add_frame(&file, 0, &env.nodes).unwrap();
    assert_eq!(expected_page_refs(Some(&*mapping), &file), 5);
    file.attach_private(1);
    assert_eq!(expected_page_refs(Some(&*mapping), &file), 6);
}

#[test]
fn settings_are_validated() {
    let topology = Arc::new(Topology::uniform(2, 1).unwrap());
    let nodes = Arc::new(MemoryNodes::for_topology(&topology));
    let allocator = Arc::new(NodeFrameAllocator::new(&[16, 16]).unwrap());
    let bad = MigrationSettings { copy_threads: 0, ..Default::default() };
    assert!(Migrator::new(topology.clone(), nodes.clone(), allocator.clone(), bad).is_err());

    let migrator = Migrator::new(topology, nodes, allocator, MigrationSettings::default()).unwrap();
    assert!(migrator.set_settings(MigrationSettings { concur_passes: 0, ..Default::default() }).is_err());
    migrator.set_settings(MigrationSettings { copy_threads: 9, avoid_remote_pmem_write: true, ..Default::default() }).unwrap();
    let settings = migrator.settings();
    assert_eq!(settings.copy_threads, MigrationSettings::default().copy_threads);
    assert!(settings.avoid_remote_pmem_write);
    assert!(migrator.copy_mode(MigrateMode::SYNC).contains(CopyMode::AVOID_REMOTE_WRITE | CopyMode::MT));
}

#[test]
fn errors_map_to_status_codes() {
    assert_eq!(MigrateError::NoMem.as_status(), -12);
    assert_eq!(MigrateError::Access.as_status(), -13);
    assert_eq!(MigrateError::NoEnt.as_status(), -2);
    assert!(MigrateError::Again.is_retryable());
    assert!(!MigrateError::Busy.is_retryable());
    assert_eq!(MigrateError::from(RelocateError::Busy), MigrateError::Busy);
    assert_eq!(std::format!("{}", MigrateError::Fault), "bad address");
}

#[test]
fn batch_leftovers_skip_terminal_items() {
    let env = env();
    let frames: Vec<_> = (0..4).map(|_| env.allocator.allocate_frame(NODE0, 1).unwrap()).collect();
    let mut batch = Batch::new(&frames);
    batch.item_mut(0).set_state(WorkItemState::Migrated);
    batch.item_mut(1).set_state(WorkItemState::Failed(MigrateError::Busy));
    batch.item_mut(2).set_state(WorkItemState::Delegated);
    batch.transition_all(WorkItemState::Pending, WorkItemState::Aborted);
    assert_eq!(batch.count_in(WorkItemState::Aborted), 1);
    let leftovers = batch.leftovers();
    assert_eq!(leftovers.len(), 1);
    assert!(Arc::ptr_eq(&leftovers[0], &frames[2]));
    let aborted = batch.frames_in(WorkItemState::Aborted);
    assert_eq!(aborted.len(), 1);
    assert!(Arc::ptr_eq(&aborted[0], &frames[3]));
}
