use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::id_set::ScopedIdSet;
use crate::checkpoint::ids::TraceId;
use crate::checkpoint::runtime::SafepointState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ids of threads that have exited while the profiler was running.
///
/// The backing set is allocated on the first recorded exit and torn down
/// only by [`clear`](Self::clear) at a safepoint. Until the first exit,
/// [`has_exited`](Self::has_exited) answers without taking the lock.
#[derive(Debug)]
pub struct ThreadExitTracker {
    allocated: AtomicBool,
    exited: Mutex<Option<ScopedIdSet<TraceId>>>,
    initial_size: usize,
}

impl ThreadExitTracker {
    pub fn new(initial_size: usize) -> Self {
        Self {
            allocated: AtomicBool::new(false),
            exited: Mutex::new(None),
            initial_size,
        }
    }

    /// Record `tid` as exited, allocating the set on first use.
    pub fn record(&self, tid: TraceId) -> Result<()> {
        if tid.is_none() {
            return Err(CheckpointError::invariant(
                Pass::ThreadExit,
                "exit notification for thread id 0",
            ));
        }
        let mut exited = self.exited.lock();
        if exited.is_none() {
            *exited = Some(ScopedIdSet::with_capacity(self.initial_size)?);
            tracing::trace!(target: "oldobj_checkpoint", "allocated exited-thread set");
        }
        if let Some(set) = exited.as_mut() {
            set.add(tid)?;
        }
        self.allocated.store(true, Ordering::Release);
        Ok(())
    }

    pub fn has_exited(&self, tid: TraceId) -> bool {
        if !self.allocated.load(Ordering::Acquire) {
            return false;
        }
        self.exited
            .lock()
            .as_ref()
            .is_some_and(|set| set.contains(tid))
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    /// Number of exits recorded since the last clear.
    pub fn len(&self) -> usize {
        self.exited.lock().as_ref().map_or(0, ScopedIdSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy the set. Mutator threads must be stopped, so no exit
    /// notification can race with the teardown.
    pub fn clear(&self, safepoint: &dyn SafepointState) -> Result<()> {
        if !safepoint.is_at_safepoint() {
            return Err(CheckpointError::invariant(
                Pass::Clear,
                "exited-thread set cleared outside a safepoint",
            ));
        }
        let mut exited = self.exited.lock();
        *exited = None;
        self.allocated.store(false, Ordering::Release);
        Ok(())
    }
}
