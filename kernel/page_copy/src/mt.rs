use std::{collections::{BTreeMap, BTreeSet}, sync::Arc};
use kernel_config::memory::PAGE_SIZE;
use numa_topology::NodeId;
use rayon::{prelude::*, ThreadPool, ThreadPoolBuilder};
use spin::Mutex;
use crate::{CopyBackend, CopyError, CopyUnit, FaultInjector};

/// Pool key for workers that are not pinned to any node.
const UNPINNED: usize = usize::MAX;

/// Copies units on a pool of worker threads.
///
/// Units are spread across the workers; a huge unit is further split into
/// one chunk per worker. One pool is created lazily for each worker node
/// that is asked for.
pub struct MultiThreadCopy {
    threads: usize,
    pools: Mutex<BTreeMap<usize, Arc<ThreadPool>>>,
    faults: Arc<FaultInjector>,
    /// (pool, worker index) of every worker that has copied a unit.
    workers_seen: Mutex<BTreeSet<(usize, usize)>>,
}

impl MultiThreadCopy {
    pub fn new(threads: usize, faults: Arc<FaultInjector>) -> Result<MultiThreadCopy, &'static str> {
        if threads == 0 {
            return Err("the multi-threaded copy backend needs at least one thread");
        }
        Ok(MultiThreadCopy {
            threads,
            pools: Mutex::new(BTreeMap::new()),
            faults,
            workers_seen: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// How many distinct workers, across all pools, have copied at least one unit.
    pub fn workers_used(&self) -> usize {
        self.workers_seen.lock().len()
    }

    fn pool(&self, worker_node: Option<NodeId>) -> Result<Arc<ThreadPool>, CopyError> {
        let key = worker_node.map_or(UNPINNED, |n| n.value());
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(move |i| match worker_node {
                Some(node) => format!("copy-n{}-{}", node, i),
                None => format!("copy-{}", i),
            })
            .build()
            .map_err(|e| {
                error!("failed to build copy worker pool: {}", e);
                CopyError::NoWorkers
            })?;
        let pool = Arc::new(pool);
        pools.insert(key, pool.clone());
        debug!("created {}-thread copy pool for node {:?}", self.threads, worker_node);
        Ok(pool)
    }

    fn copy_unit(&self, unit: &CopyUnit) -> Result<(), CopyError> {
        if self.faults.should_fail(unit) {
            return Err(CopyError::Injected);
        }
        if unit.nr_pages == 1 {
            return unit.copy_with(|dst, src| dst.copy_from_slice(src));
        }
        // Only huge units nest parallel work under their content locks, and no
        // other unit shares a huge frame, so a worker that steals a job while
        // waiting here never spins on a lock it holds itself.
        let len = unit.nr_pages * PAGE_SIZE;
        let chunk = (len / self.threads).max(PAGE_SIZE);
        unit.copy_with(|dst, src| {
            dst.par_chunks_mut(chunk)
                .zip(src.par_chunks(chunk))
                .for_each(|(d, s)| d.copy_from_slice(s));
        })
    }
}

impl CopyBackend for MultiThreadCopy {
    fn name(&self) -> &'static str {
        "multi-threaded"
    }

    fn copy_units(&self, units: &[CopyUnit], worker_node: Option<NodeId>) -> Vec<Result<(), CopyError>> {
        let pool = match self.pool(worker_node) {
            Ok(pool) => pool,
            Err(e) => return vec![Err(e); units.len()],
        };
        let key = worker_node.map_or(UNPINNED, |n| n.value());
        // Units of one gigantic frame all take its content locks in the same order,
        // so they serialize among themselves while other units proceed.
        let (results, workers): (Vec<_>, Vec<_>) = pool.install(|| {
            units.par_iter()
                .map(|u| (self.copy_unit(u), rayon::current_thread_index()))
                .unzip()
        });
        let mut seen = self.workers_seen.lock();
        seen.extend(workers.into_iter().flatten().map(|w| (key, w)));
        trace!("copied {} units on {} workers so far", units.len(), seen.len());
        results
    }
}
