use super::LeakProfiler;
use super::resolver::{ResolveStats, StackTraceResolver};
use crate::checkpoint::blob::BlobHandle;
use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::runtime::{ClassDataGraphGuard, ManagedRuntime, VmTransition};
use crate::checkpoint::sample::ObjectSampler;
use crate::checkpoint::stacktrace::StackTraceRepository;

/// Outcome of one [`LeakProfiler::on_rotation`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RotationStats {
    /// Resolved samples whose blobs were made writable again.
    pub samples_reset: usize,
    /// `None` when nothing was unresolved.
    pub resolved: Option<ResolveStats>,
}

impl LeakProfiler {
    /// Start a new epoch: every resolved sample's blobs become writable again,
    /// then stack traces are resolved for the samples added since the last
    /// type-set pass.
    ///
    /// The calling thread must not be at a safepoint. Resolution runs with
    /// the class-data-graph lock held, in a state where the runtime may
    /// safepoint the thread. The repository is cleared afterwards.
    pub fn on_rotation(
        &mut self,
        sampler: &dyn ObjectSampler,
        repository: &mut dyn StackTraceRepository,
        runtime: &dyn ManagedRuntime,
    ) -> Result<RotationStats> {
        self.ensure_running(Pass::Rotation)?;
        if runtime.is_at_safepoint() {
            return Err(CheckpointError::invariant(
                Pass::Rotation,
                "rotation entered while at a safepoint",
            ));
        }
        let mut stats = RotationStats {
            samples_reset: reset_blob_write_state(sampler),
            resolved: None,
        };
        if !sampler.has_unresolved_entry() {
            tracing::debug!(
                target: "oldobj_checkpoint",
                samples_reset = stats.samples_reset,
                "rotation: nothing unresolved"
            );
            return Ok(stats);
        }

        let resolved = {
            let _vm = VmTransition::enter(runtime);
            let lock = runtime.class_data_graph_lock().lock();
            let options = self.shared.options.load();
            let mut resolver = StackTraceResolver::new(
                &options,
                &*repository,
                runtime,
                &lock,
                &*self.retention,
            )?;
            for sample in sampler.unresolved() {
                resolver.resolve(sample)?;
            }
            resolver.stats()
        };
        repository.clear();

        tracing::debug!(
            target: "oldobj_checkpoint",
            samples_reset = stats.samples_reset,
            eligible = resolved.eligible,
            serialized = resolved.serialized,
            cache_hits = resolved.cache_hits,
            copied = resolved.copied,
            methods_tagged = resolved.methods_tagged,
            "rotation complete"
        );
        stats.resolved = Some(resolved);
        Ok(stats)
    }

    /// Rotate the sink to a fresh chunk and start a new epoch in it.
    pub fn rotate_chunk(
        &mut self,
        sampler: &dyn ObjectSampler,
        repository: &mut dyn StackTraceRepository,
        runtime: &dyn ManagedRuntime,
    ) -> Result<RotationStats> {
        self.sink.rotate()?;
        self.on_rotation(sampler, repository, runtime)
    }

    /// [`rotate_chunk`](Self::rotate_chunk) if the sink's current chunk is full.
    pub fn rotate_if_needed(
        &mut self,
        sampler: &dyn ObjectSampler,
        repository: &mut dyn StackTraceRepository,
        runtime: &dyn ManagedRuntime,
    ) -> Result<Option<RotationStats>> {
        if !self.sink.needs_rotation() {
            return Ok(None);
        }
        self.rotate_chunk(sampler, repository, runtime).map(Some)
    }

    /// Install the type set produced by the current type-set pass onto every
    /// unresolved sample, then move the resolved boundary up to the newest
    /// sample. Returns the number of samples that received the type set.
    ///
    /// Requires exclusive access to the sampler and the class-data-graph lock.
    pub fn on_type_set(
        &self,
        sampler: &mut dyn ObjectSampler,
        type_set: Option<&BlobHandle>,
        _lock: &ClassDataGraphGuard<'_>,
    ) -> Result<usize> {
        self.ensure_running(Pass::TypeSet)?;
        if !sampler.has_unresolved_entry() {
            return Ok(0);
        }
        let Some(last) = sampler.last().cloned() else {
            return Ok(0);
        };
        let mut installed = 0;
        if let Some(blob) = type_set {
            for sample in sampler.unresolved() {
                if sample.set_type_set(blob.clone()) {
                    installed += 1;
                }
            }
        }
        sampler.set_last_resolved(Some(last));
        tracing::debug!(target: "oldobj_checkpoint", installed, "type set installed");
        Ok(installed)
    }
}

/// Clear the previous epoch's written flags on every resolved sample.
fn reset_blob_write_state(sampler: &dyn ObjectSampler) -> usize {
    let mut samples = 0;
    for sample in sampler.resolved() {
        if let Some(blob) = sample.stacktrace() {
            blob.reset_write_state();
        }
        if let Some(blob) = sample.thread() {
            blob.reset_write_state();
        }
        if let Some(blob) = sample.type_set() {
            blob.reset_write_state();
        }
        samples += 1;
    }
    samples
}
