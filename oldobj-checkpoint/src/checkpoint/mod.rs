pub mod blob;
pub mod blob_cache;
pub mod config;
pub mod error;
pub mod format;
pub mod id_set;
pub mod ids;
pub mod profiler;
pub mod reader;
pub mod runtime;
pub mod sample;
pub mod stacktrace;
pub mod table;
pub mod thread_exit;
pub mod writer;

pub use blob::{Blob, BlobHandle, BlobKind};
pub use blob_cache::BlobCache;
pub use config::LeakProfilerOptions;
pub use error::{CheckpointError, Pass, Result};
pub use format::{CheckpointRecord, EdgeRecord, ThreadDescriptor, TypeBlock, TypeSetBuilder};
pub use id_set::ScopedIdSet;
pub use ids::{ClassId, MethodId, TraceId};
pub use profiler::{
    BlobRetention, LeakProfiler, ResolveStats, RotationStats, ShouldWritePolicy,
    ThreadExitHandle, WriteStats,
};
pub use reader::CheckpointReader;
pub use runtime::{
    ClassDataGraphGuard, ClassDataGraphLock, EdgeStore, ManagedRuntime, ObjectMarker,
    ReferenceChainStore, SafepointState, StandaloneRuntime,
};
pub use sample::{ObjectRef, ObjectSample, ObjectSampler, ObjectSlot, SampleChain, SampleRef};
pub use stacktrace::{FrameType, LeakStackTraceRepository, StackFrame, StackTrace, StackTraceRepository};
pub use thread_exit::ThreadExitTracker;
pub use writer::{CheckpointSink, CheckpointWriter, NullSink, RotatingSink, SimpleBinarySink};
