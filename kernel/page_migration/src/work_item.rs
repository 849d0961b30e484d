use std::{fmt, sync::Arc};
use memory::{AnonVmaHandle, Frame};
use crate::MigrateError;

/// Where a [`WorkItem`] is in the concurrent pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkItemState {
    /// Waiting to be unmapped in the next pass.
    Pending,
    Unmapping,
    /// Locked and detached from every address space, with a destination allocated.
    Unmapped,
    Transferring,
    Copying,
    Remapping,
    /// Done: the destination has replaced the source (or the source was freed meanwhile).
    Migrated,
    /// The ownership transfer found an unexpected reference, so the source was
    /// remapped and the destination released. Becomes `Pending` again for the next pass.
    Restored,
    /// Handed over to the serial path.
    Delegated,
    /// Permanently failed and returned to its LRU list.
    Failed(MigrateError),
    /// Left untouched because allocation failed for it or an earlier item of the same
    /// pass. Counted as failed and never attempted again, but still owned by the caller.
    Aborted,
}

impl WorkItemState {
    /// Returns `true` once the item has left the candidate list for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkItemState::Migrated | WorkItemState::Failed(_) | WorkItemState::Aborted)
    }
}

/// One candidate frame of a concurrent migration.
pub struct WorkItem {
    pub(crate) old: Arc<Frame>,
    /// Present from the time the item is unmapped until it is retired or restored.
    pub(crate) new: Option<Arc<Frame>>,
    /// Keeps an anonymous source's reverse mapping alive while it is detached.
    pub(crate) anon_vma: Option<AnonVmaHandle>,
    pub(crate) was_mapped: bool,
    pub(crate) state: WorkItemState,
}

impl WorkItem {
    pub fn new(old: Arc<Frame>) -> WorkItem {
        WorkItem {
            old,
            new: None,
            anon_vma: None,
            was_mapped: false,
            state: WorkItemState::Pending,
        }
    }

    pub fn old(&self) -> &Arc<Frame> {
        &self.old
    }

    pub fn new_frame(&self) -> Option<&Arc<Frame>> {
        self.new.as_ref()
    }

    pub fn state(&self) -> WorkItemState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: WorkItemState) {
        trace!("{:?}: {:?} -> {:?}", self.old.pfn(), self.state, state);
        self.state = state;
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("old", &self.old.pfn())
            .field("new", &self.new.as_ref().map(|n| n.pfn()))
            .field("was_mapped", &self.was_mapped)
            .field("state", &self.state)
            .finish()
    }
}

/// The items of one concurrent migration, each in exactly one state.
///
/// Items are kept in their original order; each state's sub-collection is a filter
/// over that one list.
#[derive(Debug, Default)]
pub struct Batch {
    items: Vec<WorkItem>,
}

impl Batch {
    pub fn new(frames: &[Arc<Frame>]) -> Batch {
        Batch { items: frames.iter().cloned().map(WorkItem::new).collect() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub(crate) fn item_mut(&mut self, idx: usize) -> &mut WorkItem {
        &mut self.items[idx]
    }

    /// Indices of the items currently in `state`, in order.
    pub(crate) fn indices_in(&self, state: WorkItemState) -> Vec<usize> {
        self.items.iter()
            .enumerate()
            .filter(|(_, item)| item.state == state)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count_in(&self, state: WorkItemState) -> usize {
        self.items.iter().filter(|item| item.state == state).count()
    }

    /// Moves every item in `from` to `to`.
    pub(crate) fn transition_all(&mut self, from: WorkItemState, to: WorkItemState) {
        for item in self.items.iter_mut().filter(|item| item.state == from) {
            item.set_state(to);
        }
    }

    /// The source frames of the items in `state`, in order.
    pub fn frames_in(&self, state: WorkItemState) -> Vec<Arc<Frame>> {
        self.items.iter()
            .filter(|item| item.state == state)
            .map(|item| item.old.clone())
            .collect()
    }

    /// The source frames of items that have not left the candidate list, in order.
    pub fn leftovers(&self) -> Vec<Arc<Frame>> {
        self.items.iter()
            .filter(|item| !item.state.is_terminal())
            .map(|item| item.old.clone())
            .collect()
    }
}
