//! Always-on record of the most recent frames of every observed process.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::FrameBus;
use crate::frame::FrameSample;
use crate::probe::ProcessRegistry;
use crate::ring_buffer::RingBuffer;

/// How often the recorder drops processes the registry has forgotten.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct FillArchive {
    per_process: Mutex<HashMap<u32, RingBuffer<Arc<FrameSample>>>>,
    capacity: NonZeroUsize,
}

impl FillArchive {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            per_process: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, RingBuffer<Arc<FrameSample>>>> {
        self.per_process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, sample: Arc<FrameSample>) {
        let capacity = self.capacity;
        self.lock()
            .entry(sample.pid)
            .or_insert_with(|| RingBuffer::with_capacity(capacity))
            .push(sample);
    }

    /// Archived frames of `pid`, oldest first.
    pub fn frames(&self, pid: u32) -> Vec<FrameSample> {
        self.lock()
            .get(&pid)
            .map(|buf| buf.iter().map(|s| FrameSample::clone(s)).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, pid: u32) -> usize {
        self.lock().get(&pid).map_or(0, RingBuffer::len)
    }

    pub fn processes(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every pid `registry` no longer lists. Returns how many went.
    pub fn retain_observed(&self, registry: &ProcessRegistry) -> usize {
        let live = registry.pids();
        let mut map = self.lock();
        let before = map.len();
        map.retain(|pid, _| live.contains(pid));
        let dropped = before - map.len();
        if dropped > 0 {
            debug!(dropped, "fill archive dropped expired processes");
        }
        dropped
    }

    /// Record everything on `bus` until `cancel` fires, sweeping out
    /// processes that expire from `registry`.
    pub fn spawn_recorder(
        self: &Arc<Self>,
        bus: &FrameBus,
        registry: Arc<ProcessRegistry>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let archive = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            sweep.tick().await;
            loop {
                tokio::select! {
                    frame = rx.recv() => match frame {
                        Some(sample) => archive.record(sample),
                        None => break,
                    },
                    _ = sweep.tick() => {
                        archive.retain_observed(&registry);
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!(lagged = rx.lagged(), "fill archive recorder stopped");
        })
    }
}
