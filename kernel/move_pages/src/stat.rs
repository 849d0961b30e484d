use kernel_config::migration::DO_PAGES_STAT_CHUNK_NR;
use memory::AddressSpace;
use page_migration::MigrateError;
use crate::{MovePagesResult, System, Task};

impl System {
    /// Stores the node of the page at each address in `status`,
    /// looking addresses up a chunk at a time.
    pub(crate) fn do_pages_stat(&self, task: &Task, pages: &[usize], status: &mut [i32]) -> MovePagesResult {
        let Some(mm) = task.address_space() else {
            return MovePagesResult::Failed(MigrateError::Inval);
        };
        for (addrs, statuses) in pages.chunks(DO_PAGES_STAT_CHUNK_NR).zip(status.chunks_mut(DO_PAGES_STAT_CHUNK_NR)) {
            let mut chunk = [0i32; DO_PAGES_STAT_CHUNK_NR];
            pages_stat_array(mm, addrs, &mut chunk[..addrs.len()]);
            statuses.copy_from_slice(&chunk[..addrs.len()]);
        }
        MovePagesResult::Done
    }
}

fn pages_stat_array(mm: &AddressSpace, addrs: &[usize], status: &mut [i32]) {
    for (&addr, entry) in addrs.iter().zip(status.iter_mut()) {
        *entry = match mm.find_vma(addr) {
            None => MigrateError::Fault.as_status(),
            Some(_) => match mm.follow_page(addr) {
                Some(frame) => frame.node().as_raw(),
                None => MigrateError::NoEnt.as_status(),
            },
        };
    }
}
