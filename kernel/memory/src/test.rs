//! Tests for frames, slots, reverse mappings, and node lists.

extern crate std;

use self::std::{dbg, thread, time::Duration};
use alloc::{sync::Arc, vec::Vec};
use kernel_config::memory::PAGE_SIZE;
use numa_topology::NodeId;

use super::*;
use super::rmap::{remove_migration_ptes, rmap_targets, try_to_unmap};

const BASE: usize = 0x4000_0000;

fn frame_on(node: usize, pfn: usize) -> Arc<Frame> {
    Arc::new(Frame::new(Pfn::new(pfn), NodeId::new(node), 1))
}

/// An address space with one anonymous, writable area of 8 pages at `BASE`,
/// with a frame on node 0 faulted in at `BASE`.
fn anon_space(nodes: &MemoryNodes) -> (Arc<AddressSpace>, Arc<Frame>) {
    let space = AddressSpace::new();
    space.mmap_anon(BASE, 8, true).unwrap();
    let frame = frame_on(0, 0x100);
    space.install_new_frame(BASE, &frame, nodes).unwrap();
    (space, frame)
}

#[test]
fn freeze_requires_exact_count() {
    let frame = frame_on(0, 1);
    frame.get();
    assert!(!frame.ref_freeze(1));
    assert_eq!(frame.ref_count(), 2);
    assert!(frame.ref_freeze(2));
    assert_eq!(frame.ref_count(), 0);
    assert!(!frame.try_get());
    frame.ref_unfreeze(2);
    assert!(frame.try_get());
    assert_eq!(frame.ref_count(), 3);
}

#[test]
fn put_reports_last_reference() {
    let frame = frame_on(0, 1);
    frame.get();
    assert!(!frame.put());
    assert!(frame.put());
    // underflow is reported, not wrapped
    assert!(!frame.put());
    assert_eq!(frame.ref_count(), 0);
}

#[test]
fn page_lock() {
    let frame = frame_on(0, 1);
    assert!(frame.trylock());
    assert!(!frame.trylock());
    assert!(frame.is_locked());
    frame.unlock();
    assert!(!frame.is_locked());
    frame.lock();
    assert!(frame.is_locked());
    frame.unlock();
}

#[test]
fn private_metadata_holds_a_reference() {
    let frame = frame_on(0, 1);
    frame.attach_private(0xb0f);
    assert!(frame.has_private());
    assert_eq!(frame.ref_count(), 2);

    frame.set_flags(PageFlags::DIRTY);
    assert!(!frame.try_release_private());
    frame.clear_flags(PageFlags::DIRTY);
    assert!(frame.try_release_private());
    assert!(!frame.has_private());
    assert_eq!(frame.private(), 0);
    assert_eq!(frame.ref_count(), 1);
}

#[test]
fn anon_fault_maps_and_accesses() {
    let nodes = MemoryNodes::new(2);
    let (space, frame) = anon_space(&nodes);
    assert_eq!(frame.ref_count(), 1);
    assert_eq!(frame.map_count(), 1);
    assert!(frame.is_anon());
    assert_eq!(frame.index(), vpage_of(BASE));
    assert!(nodes.node(NodeId::new(0)).unwrap().lru_contains(&frame));

    space.write(BASE + 8, b"hello").unwrap();
    let mut buf = [0u8; 5];
    space.read(BASE + 8, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");
    let slot = space.slot(BASE).unwrap();
    dbg!(&slot);
    assert!(slot.flags().contains(SlotFlags::WRITABLE | SlotFlags::DIRTY | SlotFlags::YOUNG));

    assert!(space.read(BASE + PAGE_SIZE, &mut buf).is_err());
    assert!(space.read(BASE + 64 * PAGE_SIZE, &mut buf).is_err());
    assert!(space.map_frame(BASE, &frame_on(0, 2)).is_err());
}

#[test]
fn read_only_area_rejects_writes() {
    let nodes = MemoryNodes::new(1);
    let space = AddressSpace::new();
    space.mmap_anon(BASE, 1, false).unwrap();
    space.install_new_frame(BASE, &frame_on(0, 1), &nodes).unwrap();
    assert!(space.write(BASE, b"x").is_err());
}

#[test]
fn unmap_to_placeholders_and_back() {
    let nodes = MemoryNodes::new(2);
    let (space, old) = anon_space(&nodes);
    space.write(BASE, b"payload").unwrap();

    nodes.isolate_lru_page(&old).unwrap();
    assert_eq!(old.ref_count(), 2);
    assert!(old.trylock());
    assert_eq!(try_to_unmap(&old, &nodes), 1);
    assert_eq!(old.ref_count(), 1);
    assert_eq!(old.map_count(), 0);
    assert!(old.is_dirty());
    let placeholder = space.slot(BASE).unwrap();
    assert!(placeholder.is_migration());
    assert!(space.follow_page(BASE).is_none());

    let new = frame_on(1, 0x200);
    new.content_mut().copy_from_slice(&old.content());
    new.copy_owner_from(&old);
    assert_eq!(remove_migration_ptes(&old, &new), 1);

    let slot = space.slot(BASE).unwrap();
    assert!(Arc::ptr_eq(slot.frame(), &new));
    assert_eq!(slot.flags(), placeholder.flags());
    assert_eq!(new.ref_count(), 2);
    assert_eq!(new.map_count(), 1);
    let mut buf = [0u8; 7];
    space.read(BASE, &mut buf).unwrap();
    assert_eq!(&buf, b"payload");
    old.unlock();
}

#[test]
fn access_waits_for_placeholder() {
    let nodes = MemoryNodes::new(2);
    let (space, old) = anon_space(&nodes);
    space.write(BASE, b"before").unwrap();
    nodes.isolate_lru_page(&old).unwrap();
    assert_eq!(try_to_unmap(&old, &nodes), 1);

    let reader = {
        let space = space.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 6];
            space.read(BASE, &mut buf).unwrap();
            buf
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!reader.is_finished());

    let new = frame_on(1, 0x200);
    new.write(0, b"after!").unwrap();
    new.copy_owner_from(&old);
    remove_migration_ptes(&old, &new);
    assert_eq!(&reader.join().unwrap(), b"after!");
}

#[test]
fn fork_shares_frames() {
    let nodes = MemoryNodes::new(1);
    let (parent, frame) = anon_space(&nodes);
    let child = parent.fork();
    assert_eq!(frame.map_count(), 2);
    assert_eq!(frame.ref_count(), 2);

    let targets = rmap_targets(&frame);
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().all(|(_, vpage)| *vpage == vpage_of(BASE)));

    assert_eq!(try_to_unmap(&frame, &nodes), 2);
    assert!(child.slot(BASE).unwrap().is_migration());
    assert!(parent.slot(BASE).unwrap().is_migration());
    assert_eq!(remove_migration_ptes(&frame, &frame), 2);
    assert_eq!(frame.map_count(), 2);

    match child.unmap(BASE).unwrap() {
        UnmapResult::NonExclusive(f) => assert!(Arc::ptr_eq(&f, &frame)),
        other => panic!("unexpected {:?}", other),
    }
    // the LRU list does not hold a reference, so the parent's slot held the last one
    assert!(matches!(parent.unmap(BASE).unwrap(), UnmapResult::Exclusive(_)));
}

#[test]
fn file_frames_are_cached_and_reverse_mapped() {
    let nodes = MemoryNodes::new(2);
    let mapping = FileMapping::new(None, true);
    let frame = frame_on(0, 0x300);
    frame.set_flags(PageFlags::DIRTY);
    mapping.add_frame(&frame, 7, &nodes).unwrap();
    assert_eq!(frame.ref_count(), 2);
    assert!(frame.is_file_cache());
    assert_eq!(nodes.state(NodeId::new(0), NodeStatItem::FilePages), 1);
    assert_eq!(nodes.state(NodeId::new(0), NodeStatItem::FileDirty), 1);
    assert!(mapping.add_frame(&frame_on(0, 0x301), 7, &nodes).is_err());

    let space = AddressSpace::new();
    space.mmap_file(BASE, 4, &mapping, 5, true).unwrap();
    assert!(space.map_frame(BASE, &frame).is_err());
    space.map_frame(BASE + 2 * PAGE_SIZE, &frame).unwrap();
    assert_eq!(frame.ref_count(), 3);

    let targets = rmap_targets(&frame);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].1, vpage_of(BASE) + 2);

    assert!(mapping.writepage(&frame, &nodes));
    assert!(!mapping.writepage(&frame, &nodes));
    assert_eq!(nodes.state(NodeId::new(0), NodeStatItem::FileDirty), 0);
    assert_eq!(mapping.writeouts(), 1);
}

#[test]
fn isolate_and_putback() {
    let nodes = MemoryNodes::new(1);
    let (_space, frame) = anon_space(&nodes);
    let node = nodes.node(NodeId::new(0)).unwrap();
    assert_eq!(node.lru_len(), 1);

    nodes.isolate_lru_page(&frame).unwrap();
    nodes.inc_isolated(&frame);
    assert!(nodes.isolate_lru_page(&frame).is_err());
    assert_eq!(node.lru_len(), 0);
    assert_eq!(nodes.state(NodeId::new(0), NodeStatItem::IsolatedAnon), 1);

    nodes.dec_isolated(&frame);
    assert!(!nodes.putback_lru_page(&frame));
    assert_eq!(nodes.nr_isolated(NodeId::new(0)), 0);
    assert!(node.lru_contains(&frame));
    assert_eq!(frame.ref_count(), 1);
}

#[test]
fn split_huge_frame_into_base_frames() {
    let nodes = MemoryNodes::new(1);
    let space = AddressSpace::new();
    space.mmap_anon(BASE, 8, true).unwrap();
    let huge = Arc::new(Frame::new(Pfn::new(0x400), NodeId::new(0), 4));
    space.install_new_frame(BASE, &huge, &nodes).unwrap();
    for i in 0..4u8 {
        space.write(BASE + i as usize * PAGE_SIZE, &[i + 1]).unwrap();
    }

    nodes.isolate_lru_page(&huge).unwrap();
    assert!(split_huge_frame(&huge).is_err(), "unlocked frames cannot be split");
    huge.lock();
    let tails = split_huge_frame(&huge).unwrap();
    huge.unlock();

    assert_eq!(tails.len(), 3);
    assert_eq!(huge.nr_pages(), 1);
    assert_eq!(huge.content().len(), PAGE_SIZE);
    assert_eq!(tails.iter().map(|t| t.pfn().value()).collect::<Vec<_>>(), [0x401, 0x402, 0x403]);
    assert_eq!(tails[1].index(), vpage_of(BASE) + 2);
    assert_eq!(tails[1].ref_count(), 2);
    assert!(Arc::ptr_eq(space.slot(BASE + 2 * PAGE_SIZE).unwrap().frame(), &tails[1]));

    let mut byte = [0u8];
    space.read(BASE + 3 * PAGE_SIZE, &mut byte).unwrap();
    assert_eq!(byte, [4]);
    space.read(BASE, &mut byte).unwrap();
    assert_eq!(byte, [1]);
}
