use crate::checkpoint::blob::BlobKind;
use crate::checkpoint::blob_cache::BlobCache;
use crate::checkpoint::config::LeakProfilerOptions;
use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::format::{self, TYPE_STACKTRACE};
use crate::checkpoint::id_set::ScopedIdSet;
use crate::checkpoint::ids::MethodId;
use crate::checkpoint::runtime::{ClassDataGraphGuard, ManagedRuntime};
use crate::checkpoint::sample::ObjectSample;
use crate::checkpoint::stacktrace::{StackFrame, StackTrace, StackTraceRepository};
use crate::checkpoint::writer::CheckpointWriter;

/// Decides, for a freshly serialized stack trace, whether the blob is built
/// from a copy of the writer's buffer or takes the buffer over.
///
/// Either way nothing reaches the stream during resolution; the blob is
/// emitted by the next write pass.
pub trait BlobRetention: Send {
    fn keep_copy(&self, trace: &StackTrace) -> bool;
}

/// Copy traces the capture subsystem has not written yet, move the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShouldWritePolicy;

impl BlobRetention for ShouldWritePolicy {
    fn keep_copy(&self, trace: &StackTrace) -> bool {
        trace.should_write()
    }
}

/// Counters for one resolution pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveStats {
    /// Live samples with a stack trace id.
    pub eligible: usize,
    /// Samples that already carried a blob from an earlier rotation.
    pub already_resolved: usize,
    pub cache_hits: usize,
    /// Traces serialized into new blobs.
    pub serialized: usize,
    /// New blobs built from a copy of the serialized block.
    pub copied: usize,
    pub methods_tagged: usize,
}

/// Attaches a stack-trace blob to every unresolved sample, serializing each
/// distinct trace once and tagging the metadata its frames reference.
///
/// Lives for one rotation; the blob cache and the method set go with it.
pub(crate) struct StackTraceResolver<'a> {
    cache: BlobCache,
    methods: ScopedIdSet<MethodId>,
    repository: &'a dyn StackTraceRepository,
    runtime: &'a dyn ManagedRuntime,
    lock: &'a ClassDataGraphGuard<'a>,
    retention: &'a dyn BlobRetention,
    stats: ResolveStats,
}

impl<'a> StackTraceResolver<'a> {
    pub(crate) fn new(
        options: &LeakProfilerOptions,
        repository: &'a dyn StackTraceRepository,
        runtime: &'a dyn ManagedRuntime,
        lock: &'a ClassDataGraphGuard<'a>,
        retention: &'a dyn BlobRetention,
    ) -> Result<Self> {
        Ok(Self {
            cache: BlobCache::new(options.old_object_queue_size)?,
            methods: ScopedIdSet::with_capacity(options.initial_id_set_size)?,
            repository,
            runtime,
            lock,
            retention,
            stats: ResolveStats::default(),
        })
    }

    pub(crate) fn stats(&self) -> ResolveStats {
        self.stats
    }

    pub(crate) fn resolve(&mut self, sample: &ObjectSample) -> Result<()> {
        if !sample.has_stack_trace_id() || sample.is_dead() {
            return Ok(());
        }
        self.stats.eligible += 1;
        if let Some(object) = sample.object() {
            self.runtime.tag_class(object.class_id);
        }
        if sample.has_stacktrace() {
            self.stats.already_resolved += 1;
            return Ok(());
        }
        if let Some(blob) = self.cache.get(sample)? {
            sample.set_stacktrace(blob);
            self.stats.cache_hits += 1;
            return Ok(());
        }

        let repository = self.repository;
        let trace = repository
            .lookup(sample.stack_trace_hash(), sample.stack_trace_id())
            .ok_or_else(|| {
                CheckpointError::invariant(
                    Pass::Rotation,
                    format!(
                        "stack trace {} (hash {:#x}) missing for a live sample",
                        sample.stack_trace_id().as_u64(),
                        sample.stack_trace_hash()
                    ),
                )
            })?;
        #[cfg(debug_assertions)]
        validate_stack_trace(sample, trace)?;

        let mut writer = CheckpointWriter::new();
        writer.write_type(TYPE_STACKTRACE)?;
        writer.write_count(1)?;
        format::write_stacktrace_with(&mut writer, trace, |frame| self.tag_frame(frame))?;

        let blob = if self.retention.keep_copy(trace) {
            self.stats.copied += 1;
            writer.copy(BlobKind::StackTrace)?
        } else {
            writer.into_blob(BlobKind::StackTrace)
        };
        self.cache.put(sample, &blob)?;
        sample.set_stacktrace(blob);
        self.stats.serialized += 1;
        Ok(())
    }

    /// Retain a frame's method unless already seen this pass or its holder is gone.
    fn tag_frame(&mut self, frame: &StackFrame) -> Result<()> {
        if !self.methods.add(frame.method_id)? {
            return Ok(());
        }
        if self.runtime.is_unloaded(frame.method_id.class_id(), self.lock) {
            return Ok(());
        }
        self.runtime.tag_method(frame.method_id);
        self.stats.methods_tagged += 1;
        Ok(())
    }
}

#[cfg(debug_assertions)]
fn validate_stack_trace(sample: &ObjectSample, trace: &StackTrace) -> Result<()> {
    if trace.hash() != sample.stack_trace_hash() || trace.id() != sample.stack_trace_id() {
        return Err(CheckpointError::invariant(
            Pass::Rotation,
            format!(
                "repository returned trace {} (hash {:#x}) for sample trace {} (hash {:#x})",
                trace.id().as_u64(),
                trace.hash(),
                sample.stack_trace_id().as_u64(),
                sample.stack_trace_hash()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::format::{CheckpointRecord, read_type_blocks};
    use crate::checkpoint::ids::{ClassId, TraceId};
    use crate::checkpoint::runtime::StandaloneRuntime;
    use crate::checkpoint::sample::ObjectRef;
    use crate::checkpoint::stacktrace::{FrameType, LeakStackTraceRepository};

    struct AlwaysMove;

    impl BlobRetention for AlwaysMove {
        fn keep_copy(&self, _trace: &StackTrace) -> bool {
            false
        }
    }

    fn live_sample(hash: u64, id: u64) -> ObjectSample {
        ObjectSample::builder()
            .stack_trace(hash, TraceId(id))
            .object(ObjectRef {
                address: 0x100,
                class_id: ClassId(90),
            })
            .build()
    }

    fn method(class: u64, idnum: u16) -> MethodId {
        MethodId::new(ClassId(class), idnum)
    }

    fn repository() -> LeakStackTraceRepository {
        let mut repo = LeakStackTraceRepository::new();
        repo.record(StackTrace::new(
            TraceId(1),
            0x11,
            true,
            vec![
                StackFrame::new(method(3, 1), 10, 0, FrameType::Jit),
                StackFrame::new(method(3, 1), 12, 4, FrameType::Jit),
                StackFrame::new(method(4, 1), 20, 8, FrameType::Interpreted),
            ],
        ));
        repo
    }

    #[test]
    fn test_same_trace_serialized_once() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();

        let a = live_sample(0x11, 1);
        let b = live_sample(0x11, 1);
        resolver.resolve(&a).unwrap();
        resolver.resolve(&b).unwrap();

        let stats = resolver.stats();
        assert_eq!(stats.serialized, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!(a.stacktrace().unwrap().ptr_eq(b.stacktrace().unwrap()));

        let blocks = read_type_blocks(a.stacktrace().unwrap().bytes()).unwrap();
        match &blocks[0].records[..] {
            [CheckpointRecord::StackTrace(record)] => {
                assert_eq!(record.id, TraceId(1));
                assert!(record.reached_root);
                assert_eq!(record.frames.len(), 3);
            }
            other => panic!("unexpected records {other:?}"),
        }
    }

    #[test]
    fn test_repeated_method_tagged_once() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();
        resolver.resolve(&live_sample(0x11, 1)).unwrap();

        assert_eq!(runtime.method_tag_count(method(3, 1)), 1);
        assert_eq!(runtime.method_tag_count(method(4, 1)), 1);
        assert_eq!(runtime.class_tag_count(ClassId(90)), 1);
        assert_eq!(resolver.stats().methods_tagged, 2);
    }

    #[test]
    fn test_unloaded_holder_not_tagged() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        runtime.unload_class(ClassId(4));
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();
        resolver.resolve(&live_sample(0x11, 1)).unwrap();

        assert_eq!(runtime.method_tag_count(method(4, 1)), 0);
        assert_eq!(runtime.class_tag_count(ClassId(4)), 0);
        assert_eq!(runtime.method_tag_count(method(3, 1)), 1);
    }

    #[test]
    fn test_dead_and_traceless_samples_are_skipped() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();

        let dead = live_sample(0x11, 1);
        dead.object_slot().clear();
        let traceless = ObjectSample::builder()
            .object(ObjectRef {
                address: 0x200,
                class_id: ClassId(91),
            })
            .build();
        resolver.resolve(&dead).unwrap();
        resolver.resolve(&traceless).unwrap();

        assert!(!dead.has_stacktrace());
        assert!(!traceless.has_stacktrace());
        assert_eq!(resolver.stats().eligible, 0);
        assert_eq!(runtime.class_tag_count(ClassId(91)), 0);
    }

    #[test]
    fn test_copy_and_move_build_identical_blobs() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();

        let copied = live_sample(0x11, 1);
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &ShouldWritePolicy).unwrap();
        resolver.resolve(&copied).unwrap();
        assert_eq!(resolver.stats().copied, 1);

        let moved = live_sample(0x11, 1);
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();
        resolver.resolve(&moved).unwrap();
        assert_eq!(resolver.stats().copied, 0);

        let copied = copied.stacktrace().unwrap();
        assert_eq!(copied.bytes(), moved.stacktrace().unwrap().bytes());
        assert!(!copied.is_written());
    }

    #[test]
    fn test_missing_trace_is_invariant_violation() {
        let repo = repository();
        let runtime = StandaloneRuntime::new();
        let lock = runtime.class_data_graph_lock().lock();
        let options = LeakProfilerOptions::default();
        let mut resolver =
            StackTraceResolver::new(&options, &repo, &runtime, &lock, &AlwaysMove).unwrap();
        let err = resolver
            .resolve(&live_sample(0x99, 77))
            .unwrap_err();
        assert!(err.is_invariant());
    }
}
