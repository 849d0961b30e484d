//! The memory model that page migration operates on.
//!
//! * [`Frame`]: a physical frame (or a huge unit spanning several contiguous frames)
//!   with a reference count, a map count, a page lock, page flags, and its content.
//! * [`AddressSpace`]: a set of virtual memory areas ([`Vma`]s) and the slots
//!   (page table entries) that map virtual pages to frames.
//!   A slot is either present or holds a migration placeholder;
//!   accessing an address whose slot holds a placeholder waits until it is replaced.
//! * [`AnonVma`] and [`FileMapping`]: the two kinds of frame owner,
//!   which provide the reverse mapping from a frame back to every slot that maps it.
//! * [`MemoryNodes`]: per-node LRU lists and page-state counters.
//!
//! # Reference counting
//! A frame's reference count is a semantic count, separate from the `Arc`s that keep
//! the `Frame` object itself alive. References are held by:
//! whoever allocated the frame (until it is put on an LRU list or freed),
//! each present slot mapping it, each page-cache slot holding it,
//! attached private metadata, and a caller that isolated it from its LRU list.
//! Migration placeholders do not hold a reference.

#![no_std]

#[macro_use] extern crate alloc;
#[macro_use] extern crate log;
extern crate spin;
extern crate bitflags;
extern crate derive_more;
extern crate kernel_config;
extern crate numa_topology;

#[cfg(test)]
mod test;

mod address_space;
mod anon;
mod file;
mod flags;
mod frame;
mod huge;
mod node;
pub mod rmap;

pub use address_space::{AddressSpace, Slot, UnmapResult, Vma, VmaKind};
pub use anon::{AnonVma, AnonVmaHandle};
pub use file::{FileMapping, RelocateError, RelocateFrame};
pub use flags::{PageFlags, SlotFlags};
pub use frame::{Frame, FrameOwner};
pub use huge::split_huge_frame;
pub use node::{MemoryNodes, NodeMemory, NodeStatItem};

use core::{fmt, ops::Add};
use derive_more::{From, Into, LowerHex, UpperHex};
use kernel_config::memory::{PAGE_SHIFT, PAGE_SIZE};

/// A physical frame number.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into, LowerHex, UpperHex)]
pub struct Pfn(usize);

impl Pfn {
    pub const fn new(pfn: usize) -> Pfn {
        Pfn(pfn)
    }

    pub const fn value(self) -> usize {
        self.0
    }
}

impl Add<usize> for Pfn {
    type Output = Pfn;
    fn add(self, rhs: usize) -> Pfn {
        Pfn(self.0 + rhs)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "pfn {:#X}", self.0)
    }
}

/// Returns the virtual page number that contains the given virtual address.
pub const fn vpage_of(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

/// Returns the offset of the given virtual address into its page.
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}
