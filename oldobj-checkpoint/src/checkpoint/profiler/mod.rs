//! Checkpoint passes of the leak profiler.
//!
//! [`LeakProfiler`] owns the sink and the state shared with thread-exit
//! hooks. The sampler, the stack trace repository and the runtime are
//! borrowed per pass. Only one rotation, type-set or write pass runs at a
//! time; the caller guarantees it.

mod emit;
mod mark;
mod resolver;
mod rotation;
mod shared_state;

pub use emit::WriteStats;
pub use resolver::{BlobRetention, ResolveStats, ShouldWritePolicy};
pub use rotation::RotationStats;

use shared_state::SharedState;

use crate::checkpoint::config::LeakProfilerOptions;
use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::ids::TraceId;
use crate::checkpoint::runtime::SafepointState;
use crate::checkpoint::writer::CheckpointSink;
use std::sync::Arc;
use std::sync::atomic::Ordering;

pub struct LeakProfiler {
    shared: Arc<SharedState>,
    sink: Box<dyn CheckpointSink>,
    retention: Box<dyn BlobRetention>,
}

impl LeakProfiler {
    pub fn new(sink: Box<dyn CheckpointSink>) -> Self {
        Self::with_options(sink, LeakProfilerOptions::default())
    }

    pub fn with_options(sink: Box<dyn CheckpointSink>, options: LeakProfilerOptions) -> Self {
        Self {
            shared: Arc::new(SharedState::new(options)),
            sink,
            retention: Box::new(ShouldWritePolicy),
        }
    }

    /// Replace the copy-or-move decision used when resolving stack traces.
    pub fn with_retention(mut self, retention: impl BlobRetention + 'static) -> Self {
        self.retention = Box::new(retention);
        self
    }

    pub fn start(&self) {
        self.shared.running.store(true, Ordering::Release);
        tracing::debug!(target: "oldobj_checkpoint", "leak profiler started");
    }

    /// Stop tracking thread exits. The exited-thread set survives until
    /// [`clear`](Self::clear).
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        tracing::debug!(target: "oldobj_checkpoint", "leak profiler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn options(&self) -> Arc<LeakProfilerOptions> {
        self.shared.options.load_full()
    }

    /// Takes effect from the next pass.
    pub fn update_options(&self, options: LeakProfilerOptions) {
        self.shared.options.store(Arc::new(options));
    }

    pub fn thread_exit_handle(&self) -> ThreadExitHandle {
        ThreadExitHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn on_thread_exit(&self, tid: TraceId) -> Result<()> {
        self.shared.on_thread_exit(tid)
    }

    pub fn has_thread_exited(&self, tid: TraceId) -> bool {
        self.shared.exited_threads.has_exited(tid)
    }

    /// Drop the exited-thread set. Only legal at a safepoint.
    pub fn clear(&self, safepoint: &dyn SafepointState) -> Result<()> {
        self.shared.exited_threads.clear(safepoint)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    pub fn sink(&self) -> &dyn CheckpointSink {
        &*self.sink
    }

    pub fn into_sink(self) -> Box<dyn CheckpointSink> {
        self.sink
    }

    fn ensure_running(&self, pass: Pass) -> Result<()> {
        if !self.is_running() {
            return Err(CheckpointError::invariant(
                pass,
                "pass invoked while the profiler is stopped",
            ));
        }
        Ok(())
    }
}

/// Cheap, cloneable handle for reporting thread exits from any thread.
#[derive(Clone)]
pub struct ThreadExitHandle {
    shared: Arc<SharedState>,
}

impl ThreadExitHandle {
    /// Record `tid` as exited. A no-op while the profiler is stopped.
    pub fn on_thread_exit(&self, tid: TraceId) -> Result<()> {
        self.shared.on_thread_exit(tid)
    }

    pub fn has_exited(&self, tid: TraceId) -> bool {
        self.shared.exited_threads.has_exited(tid)
    }
}
