//! Tests for per-node capacity and exhaustion injection.

extern crate std;

use self::std::dbg;

use super::*;

#[test]
fn allocates_on_requested_node() {
    let allocator = NodeFrameAllocator::new(&[4, 4]).unwrap();
    let frame = allocator.allocate_frame(NodeId::new(1), 1).unwrap();
    dbg!(&frame);
    assert_eq!(frame.node(), NodeId::new(1));
    assert_eq!(frame.ref_count(), 1);
    assert_eq!(allocator.free_pages(NodeId::new(1)), 3);
    assert_eq!(allocator.free_pages(NodeId::new(0)), 4);
    assert!(allocator.allocate_frame(NodeId::new(2), 1).is_none());
}

#[test]
fn frame_numbers_are_unique() {
    let allocator = NodeFrameAllocator::new(&[16]).unwrap();
    let a = allocator.allocate_frame(NodeId::new(0), 4).unwrap();
    let b = allocator.allocate_frame(NodeId::new(0), 1).unwrap();
    assert_eq!(b.pfn().value(), a.pfn().value() + 4);
    assert_eq!(a.nr_pages(), 4);
    assert_eq!(a.content().len(), 4 * kernel_config::memory::PAGE_SIZE);
}

#[test]
fn node_capacity_is_enforced() {
    let allocator = NodeFrameAllocator::new(&[3]).unwrap();
    let node = NodeId::new(0);
    let huge = allocator.allocate_frame(node, 2).unwrap();
    assert!(allocator.allocate_frame(node, 2).is_none());
    let small = allocator.allocate_frame(node, 1).unwrap();
    assert!(allocator.allocate_frame(node, 1).is_none());

    allocator.free_frame(huge);
    assert_eq!(allocator.free_pages(node), 2);
    allocator.free_frame(small);
    assert_eq!(allocator.allocated_pages(node), 0);
}

#[test]
fn injected_exhaustion() {
    let allocator = NodeFrameAllocator::new(&[100]).unwrap();
    let node = NodeId::new(0);
    allocator.fail_after(node, 2);
    assert!(allocator.allocate_frame(node, 1).is_some());
    assert!(allocator.allocate_frame(node, 1).is_some());
    assert!(allocator.allocate_frame(node, 1).is_none());
    allocator.clear_failures();
    assert!(allocator.allocate_frame(node, 1).is_some());
}

#[test]
fn referenced_frames_are_not_freed() {
    let allocator = NodeFrameAllocator::new(&[2]).unwrap();
    let node = NodeId::new(0);
    let frame = allocator.allocate_frame(node, 1).unwrap();
    frame.get();
    allocator.free_frame(frame.clone());
    assert_eq!(allocator.allocated_pages(node), 1);

    frame.put();
    frame.set_flags(PageFlags::DIRTY);
    allocator.free_frame(frame.clone());
    assert_eq!(allocator.allocated_pages(node), 0);
    assert_eq!(frame.ref_count(), 0);
    assert!(frame.flags().is_empty());
}

#[test]
fn empty_allocator_is_rejected() {
    assert!(NodeFrameAllocator::new(&[]).is_err());
}
