use super::LeakProfiler;
use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::format::{self, TYPE_STACKTRACE};
use crate::checkpoint::id_set::ScopedIdSet;
use crate::checkpoint::ids::TraceId;
use crate::checkpoint::runtime::ReferenceChainStore;
use crate::checkpoint::sample::{ObjectSample, ObjectSampler};
use crate::checkpoint::stacktrace::StackTraceRepository;
use crate::checkpoint::thread_exit::ThreadExitTracker;
use crate::checkpoint::writer::CheckpointWriter;

/// Outcome of one [`LeakProfiler::write`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    /// Samples inside the emission window.
    pub samples: usize,
    pub stacktrace_blobs: usize,
    pub thread_blobs: usize,
    pub type_set_blobs: usize,
    /// Distinct stack trace ids that had no blob attached.
    pub pending: usize,
    /// Records in the deduplicated stack trace block. Always equals `pending`.
    pub dedup_records: usize,
    pub chain_records: usize,
}

impl WriteStats {
    pub fn blobs_written(&self) -> usize {
        self.stacktrace_blobs + self.thread_blobs + self.type_set_blobs
    }
}

impl LeakProfiler {
    /// Emit the sampled objects' descriptions.
    ///
    /// Samples allocated before the last sweep are emitted, or every live
    /// sample when `emit_all` is set. Each attached blob reaches the stream
    /// at most once per epoch. Traces of samples without a blob are written
    /// together in one stack trace block, followed by the reference chains.
    ///
    /// Also runs after [`stop`](LeakProfiler::stop), for the final checkpoint
    /// of a recording. On error nothing from this pass is committed.
    pub fn write(
        &mut self,
        sampler: &dyn ObjectSampler,
        repository: &dyn StackTraceRepository,
        chains: &dyn ReferenceChainStore,
        emit_all: bool,
    ) -> Result<WriteStats> {
        let options = self.shared.options.load();
        let mut pending = ScopedIdSet::with_capacity(options.pass_set_size())?;
        let last_sweep = if emit_all {
            i64::MAX
        } else {
            sampler.last_sweep()
        };
        let mut stats = WriteStats::default();

        let mut blobs = CheckpointWriter::new();
        for sample in sampler.all() {
            if !sample.is_alive_and_older_than(last_sweep) {
                continue;
            }
            stats.samples += 1;
            write_blobs(
                sample,
                &self.shared.exited_threads,
                &mut blobs,
                &mut pending,
                &mut stats,
            )?;
        }

        let mut stacktraces = CheckpointWriter::new();
        if !pending.is_empty() {
            stats.pending = pending.len();
            stats.dedup_records = write_stacktraces(&mut stacktraces, repository, &pending)?;
        }

        let mut edges = CheckpointWriter::new();
        if !chains.is_empty() {
            stats.chain_records = chains.write_chains(&mut edges)?;
        }

        blobs.commit(&mut *self.sink)?;
        stacktraces.commit(&mut *self.sink)?;
        edges.commit(&mut *self.sink)?;

        tracing::debug!(
            target: "oldobj_checkpoint",
            emit_all,
            samples = stats.samples,
            blobs_written = stats.blobs_written(),
            pending = stats.pending,
            dedup_records = stats.dedup_records,
            chain_records = stats.chain_records,
            "checkpoint written"
        );
        Ok(stats)
    }
}

fn write_blobs(
    sample: &ObjectSample,
    exited_threads: &ThreadExitTracker,
    writer: &mut CheckpointWriter,
    pending: &mut ScopedIdSet<TraceId>,
    stats: &mut WriteStats,
) -> Result<()> {
    if let Some(blob) = sample.stacktrace() {
        if blob.exclusive_write(writer)? {
            stats.stacktrace_blobs += 1;
        }
    } else if sample.has_stack_trace_id() {
        pending.add(sample.stack_trace_id())?;
    }

    // Live platform threads are described elsewhere.
    if let Some(blob) = sample.thread() {
        let tid = sample.thread_id();
        let describe = sample.is_virtual_thread()
            || (!tid.is_none() && exited_threads.has_exited(tid));
        if describe && blob.exclusive_write(writer)? {
            stats.thread_blobs += 1;
        }
    }

    if let Some(blob) = sample.type_set()
        && blob.exclusive_write(writer)?
    {
        stats.type_set_blobs += 1;
    }
    Ok(())
}

/// One stack trace block holding every pending trace the capture subsystem
/// still owes. Returns the number of records.
fn write_stacktraces(
    writer: &mut CheckpointWriter,
    repository: &dyn StackTraceRepository,
    pending: &ScopedIdSet<TraceId>,
) -> Result<usize> {
    writer.write_type(TYPE_STACKTRACE)?;
    let count_slot = writer.reserve_count()?;
    let mut count = 0usize;
    repository.for_each_trace(&mut |trace| {
        if trace.should_write() && pending.contains(trace.id()) {
            format::write_stacktrace(writer, trace)?;
            count += 1;
        }
        Ok(())
    })?;
    if count != pending.len() {
        return Err(CheckpointError::invariant(
            Pass::Write,
            format!(
                "stack trace block holds {count} records for {} pending ids",
                pending.len()
            ),
        ));
    }
    let count = u32::try_from(count)
        .map_err(|_| CheckpointError::Format("stack trace block too large".into()))?;
    writer.patch_count(count_slot, count);
    Ok(count as usize)
}
