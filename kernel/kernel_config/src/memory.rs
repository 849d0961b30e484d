//! Frame and huge-page geometry.

/// The lower 12 bits of an address are the offset into its page.
pub const PAGE_SHIFT: usize = 12;
/// Page size is 4096 bytes, 4KiB pages.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Value: 9. A PMD-level (transparent) huge page is `1 << HPAGE_PMD_ORDER` base frames.
pub const HPAGE_PMD_ORDER: usize = 9;
/// Value: 512. Number of base frames in a PMD-level huge page (2MiB).
pub const HPAGE_PMD_NR: usize = 1 << HPAGE_PMD_ORDER;

/// Value: 11. The largest order the buddy allocator hands out in one piece.
pub const MAX_ORDER: usize = 11;
/// Value: 1024. Units spanning more base frames than this are "gigantic":
/// their constituent frames are not guaranteed to be contiguous in the frame map,
/// so they are copied one constituent frame at a time.
pub const MAX_ORDER_NR_PAGES: usize = 1 << (MAX_ORDER - 1);

/// The maximum number of NUMA nodes; node identifiers are `0..MAX_NUMNODES`.
pub const MAX_NUMNODES: usize = 64;

/// The distance from a node to itself in the node distance table.
pub const LOCAL_DISTANCE: u8 = 10;
/// The default distance between two distinct nodes.
pub const REMOTE_DISTANCE: u8 = 20;

/// Free base frames that must remain on a node after a misplaced page
/// has been migrated onto it.
pub const MISPLACED_WATERMARK_PAGES: usize = 16;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(HPAGE_PMD_NR < MAX_ORDER_NR_PAGES);
// node masks are backed by a single u64
const_assert!(MAX_NUMNODES <= 64);
const_assert!(LOCAL_DISTANCE < REMOTE_DISTANCE);
