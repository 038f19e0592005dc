#![allow(dead_code)]

use oldobj_checkpoint::checkpoint::format::{self, CheckpointRecord, TypeBlock};
use oldobj_checkpoint::checkpoint::{
    BlobHandle, CheckpointSink, ClassId, EdgeStore, FrameType, LeakProfiler, LeakProfilerOptions,
    LeakStackTraceRepository, ManagedRuntime, MethodId, ObjectRef, ObjectSample, RotationStats,
    SampleChain, SampleRef, StackFrame, StackTrace, StandaloneRuntime, ThreadDescriptor, TraceId,
    WriteStats,
};
use std::sync::{Arc, Mutex};

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct Captured {
    pub checkpoints: Vec<Vec<u8>>,
    pub rotations: usize,
}

/// A [`CheckpointSink`] that keeps every committed checkpoint in memory.
pub struct CapturingSink(Arc<Mutex<Captured>>);

impl CapturingSink {
    pub fn new() -> (Self, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        (Self(captured.clone()), captured)
    }
}

impl CheckpointSink for CapturingSink {
    fn write_checkpoint(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.0.lock().unwrap().checkpoints.push(payload.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().rotations += 1;
        Ok(())
    }
}

pub fn decode(payload: &[u8]) -> Vec<TypeBlock> {
    format::read_type_blocks(payload).unwrap()
}

/// Ids of every stack trace record in `checkpoints`, in stream order.
pub fn stack_trace_ids(checkpoints: &[Vec<u8>]) -> Vec<TraceId> {
    checkpoints
        .iter()
        .flat_map(|payload| decode(payload))
        .flat_map(|block| block.records)
        .filter_map(|record| match record {
            CheckpointRecord::StackTrace(st) => Some(st.id),
            _ => None,
        })
        .collect()
}

pub fn count_records(checkpoints: &[Vec<u8>], type_id: u64) -> usize {
    checkpoints
        .iter()
        .flat_map(|payload| decode(payload))
        .filter(|block| block.type_id == type_id)
        .map(|block| block.records.len())
        .sum()
}

/// A trace whose frames call `(class, method index)` pairs, innermost first.
pub fn trace(id: u64, hash: u64, frames: &[(u64, u16)]) -> StackTrace {
    let frames = frames
        .iter()
        .enumerate()
        .map(|(i, &(class, idnum))| {
            StackFrame::new(
                MethodId::new(ClassId(class), idnum),
                10 + i as i32,
                i as i32,
                FrameType::Jit,
            )
        })
        .collect();
    StackTrace::new(TraceId(id), hash, true, frames)
}

pub fn object(address: usize) -> ObjectRef {
    ObjectRef {
        address,
        class_id: ClassId(500),
    }
}

/// A live sample allocated at `time` with the given stack trace.
pub fn sample(hash: u64, id: u64, time: i64) -> ObjectSample {
    ObjectSample::builder()
        .stack_trace(hash, TraceId(id))
        .object(object(0x1000 + time as usize))
        .allocated_at(time)
        .build()
}

pub fn thread_blob(tid: u64, is_virtual: bool) -> BlobHandle {
    ThreadDescriptor {
        tid: TraceId(tid),
        os_thread_id: 1000 + tid,
        name: format!("thread-{tid}"),
        is_virtual,
    }
    .to_blob()
    .unwrap()
}

/// A started profiler wired to an in-memory sink and standalone collaborators.
pub struct Harness {
    pub profiler: LeakProfiler,
    pub captured: Arc<Mutex<Captured>>,
    pub chain: SampleChain,
    pub repo: LeakStackTraceRepository,
    pub runtime: StandaloneRuntime,
    pub edges: EdgeStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(LeakProfilerOptions::default())
    }

    pub fn with_options(options: LeakProfilerOptions) -> Self {
        init_tracing();
        let (sink, captured) = CapturingSink::new();
        let profiler = LeakProfiler::with_options(Box::new(sink), options);
        profiler.start();
        Self {
            profiler,
            captured,
            chain: SampleChain::new(),
            repo: LeakStackTraceRepository::new(),
            runtime: StandaloneRuntime::new(),
            edges: EdgeStore::new(),
        }
    }

    pub fn push(&mut self, sample: ObjectSample) -> SampleRef {
        self.chain.push(sample)
    }

    pub fn rotate(&mut self) -> RotationStats {
        self.profiler
            .on_rotation(&self.chain, &mut self.repo, &self.runtime)
            .unwrap()
    }

    pub fn type_set(&mut self, type_set: Option<&BlobHandle>) -> usize {
        let lock = self.runtime.class_data_graph_lock().lock();
        self.profiler
            .on_type_set(&mut self.chain, type_set, &lock)
            .unwrap()
    }

    /// Rotation followed by the type-set pass: everything pushed so far ends
    /// up resolved.
    pub fn resolve_all(&mut self) -> RotationStats {
        let stats = self.rotate();
        self.type_set(None);
        stats
    }

    pub fn write(&mut self, emit_all: bool) -> WriteStats {
        self.profiler
            .write(&self.chain, &self.repo, &self.edges, emit_all)
            .unwrap()
    }

    /// Checkpoints committed since the last call.
    pub fn take_checkpoints(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.captured.lock().unwrap().checkpoints)
    }
}
