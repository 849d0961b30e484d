use alloc::{sync::{Arc, Weak}, vec::Vec};
use core::{fmt, ops::Deref, sync::atomic::{AtomicUsize, Ordering}};
use spin::Mutex;
use crate::AddressSpace;

static NEXT_ANON_VMA_ID: AtomicUsize = AtomicUsize::new(1);

/// The reverse mapping for anonymous memory: the set of address spaces
/// that may map the anonymous frames of one virtual memory area,
/// which is shared between a parent and its forked children.
///
/// An anonymous frame maps the same virtual page (its index) in every linked address space.
pub struct AnonVma {
    id: usize,
    spaces: Mutex<Vec<Weak<AddressSpace>>>,
}

impl AnonVma {
    pub fn new() -> Arc<AnonVma> {
        Arc::new(AnonVma {
            id: NEXT_ANON_VMA_ID.fetch_add(1, Ordering::Relaxed),
            spaces: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn link(&self, space: &Arc<AddressSpace>) {
        let mut spaces = self.spaces.lock();
        spaces.retain(|s| s.strong_count() > 0);
        spaces.push(Arc::downgrade(space));
    }

    /// Returns the address spaces that are still alive.
    pub fn spaces(&self) -> Vec<Arc<AddressSpace>> {
        self.spaces.lock().iter().filter_map(Weak::upgrade).collect()
    }
}

impl fmt::Debug for AnonVma {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AnonVma({})", self.id)
    }
}


/// A counted handle that keeps an [`AnonVma`] alive while a frame it maps is detached.
///
/// Without it, the last address space could exit while its slots hold migration placeholders,
/// and the reverse mapping needed to restore or repoint those slots would be gone.
/// The handle is released when dropped.
pub struct AnonVmaHandle(Arc<AnonVma>);

impl AnonVmaHandle {
    pub(crate) fn new(anon_vma: Arc<AnonVma>) -> AnonVmaHandle {
        AnonVmaHandle(anon_vma)
    }
}

impl Deref for AnonVmaHandle {
    type Target = AnonVma;
    fn deref(&self) -> &AnonVma {
        &self.0
    }
}

impl fmt::Debug for AnonVmaHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AnonVmaHandle({})", self.0.id)
    }
}
