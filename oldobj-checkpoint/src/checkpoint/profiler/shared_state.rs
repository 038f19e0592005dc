use crate::checkpoint::config::LeakProfilerOptions;
use crate::checkpoint::error::Result;
use crate::checkpoint::ids::TraceId;
use crate::checkpoint::thread_exit::ThreadExitTracker;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};

/// State reachable from thread-exit hooks on arbitrary threads, lock-free
/// apart from the exited-thread set itself.
pub(crate) struct SharedState {
    pub(crate) running: AtomicBool,
    pub(crate) options: ArcSwap<LeakProfilerOptions>,
    pub(crate) exited_threads: ThreadExitTracker,
}

impl SharedState {
    pub(super) fn new(options: LeakProfilerOptions) -> Self {
        Self {
            running: AtomicBool::new(false),
            exited_threads: ThreadExitTracker::new(options.initial_id_set_size),
            options: ArcSwap::from_pointee(options),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Exits are only tracked while the profiler runs.
    pub(crate) fn on_thread_exit(&self, tid: TraceId) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.exited_threads.record(tid)
    }
}
