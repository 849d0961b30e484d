use std::{sync::Arc, thread::JoinHandle};
use crossbeam_channel::{bounded, Receiver, Sender};
use kernel_config::{memory::PAGE_SIZE, migration::DMA_RING_SLOTS};
use numa_topology::NodeId;
use crate::{CopyBackend, CopyError, CopyUnit, FaultInjector};

/// One submission to the DMA channel: a batch of units and where to report the results.
struct DmaRequest {
    units: Vec<CopyUnit>,
    done: Sender<Vec<Result<(), CopyError>>>,
}

/// A DMA offload channel.
///
/// Requests go through a bounded submission ring to a dedicated worker thread,
/// which processes each unit as a chain of page-sized descriptors
/// and posts one completion per request.
pub struct DmaChannel {
    submit: Option<Sender<DmaRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DmaChannel {
    pub fn start(faults: Arc<FaultInjector>) -> Result<DmaChannel, &'static str> {
        let (submit, requests) = bounded(DMA_RING_SLOTS);
        let worker = std::thread::Builder::new()
            .name("dma-copy".into())
            .spawn(move || dma_worker(requests, faults))
            .map_err(|_| "failed to spawn the DMA worker thread")?;
        Ok(DmaChannel {
            submit: Some(submit),
            worker: Some(worker),
        })
    }
}

fn dma_worker(requests: Receiver<DmaRequest>, faults: Arc<FaultInjector>) {
    for request in requests.iter() {
        let results = request.units.iter()
            .map(|unit| {
                if faults.should_fail(unit) {
                    return Err(CopyError::Injected);
                }
                unit.copy_with(|dst, src| {
                    for (d, s) in dst.chunks_mut(PAGE_SIZE).zip(src.chunks(PAGE_SIZE)) {
                        d.copy_from_slice(s);
                    }
                })
            })
            .collect();
        // the submitter may have given up waiting
        let _ = request.done.send(results);
    }
    trace!("DMA worker exiting");
}

impl CopyBackend for DmaChannel {
    fn name(&self) -> &'static str {
        "DMA"
    }

    fn copy_units(&self, units: &[CopyUnit], _worker_node: Option<NodeId>) -> Vec<Result<(), CopyError>> {
        let closed = || vec![Err(CopyError::ChannelClosed); units.len()];
        let Some(submit) = self.submit.as_ref() else {
            return closed();
        };
        let (done, completion) = bounded(1);
        let request = DmaRequest { units: units.to_vec(), done };
        if submit.send(request).is_err() {
            error!("DMA channel is closed");
            return closed();
        }
        match completion.recv() {
            Ok(results) => results,
            Err(_) => {
                error!("DMA worker exited without completing a request");
                closed()
            }
        }
    }
}

impl Drop for DmaChannel {
    fn drop(&mut self) {
        // closing the ring makes the worker's loop end
        drop(self.submit.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("DMA worker thread panicked");
            }
        }
    }
}
