//! Stack traces as handed over by the trace-capture subsystem.

use crate::checkpoint::error::Result;
use crate::checkpoint::ids::{ClassId, MethodId, TraceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FrameType {
    Interpreted = 0,
    Jit = 1,
    Inlined = 2,
    Native = 3,
}

impl FrameType {
    /// Unknown values decode as `Interpreted`.
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => FrameType::Jit,
            2 => FrameType::Inlined,
            3 => FrameType::Native,
            _ => FrameType::Interpreted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// Holder of `method_id`.
    pub class_id: ClassId,
    pub method_id: MethodId,
    pub line: i32,
    pub bci: i32,
    pub frame_type: FrameType,
}

impl StackFrame {
    pub fn new(method_id: MethodId, line: i32, bci: i32, frame_type: FrameType) -> Self {
        Self {
            class_id: method_id.class_id(),
            method_id,
            line,
            bci,
            frame_type,
        }
    }
}

/// A captured allocation stack trace.
#[derive(Debug)]
pub struct StackTrace {
    id: TraceId,
    hash: u64,
    reached_root: bool,
    frames: Vec<StackFrame>,
    written: AtomicBool,
}

impl StackTrace {
    pub fn new(id: TraceId, hash: u64, reached_root: bool, frames: Vec<StackFrame>) -> Self {
        Self {
            id,
            hash,
            reached_root,
            frames,
            written: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn reached_root(&self) -> bool {
        self.reached_root
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// True until the trace has been serialized into the stream.
    pub fn should_write(&self) -> bool {
        !self.written.load(Ordering::Acquire)
    }

    pub fn mark_written(&self) {
        self.written.store(true, Ordering::Release);
    }
}

/// The trace-capture repository, as far as the leak profiler sees it.
pub trait StackTraceRepository {
    /// Find the trace recorded under `(hash, id)`.
    fn lookup(&self, hash: u64, id: TraceId) -> Option<&StackTrace>;

    /// Visit every trace retained for the leak profiler.
    fn for_each_trace(&self, visit: &mut dyn FnMut(&StackTrace) -> Result<()>) -> Result<()>;

    /// Release traces consumed by the current rotation.
    fn clear(&mut self);
}

/// In-memory repository keyed by trace id.
#[derive(Debug, Default)]
pub struct LeakStackTraceRepository {
    traces: BTreeMap<TraceId, StackTrace>,
}

impl LeakStackTraceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trace. A trace already recorded under the same id is kept.
    pub fn record(&mut self, trace: StackTrace) -> TraceId {
        let id = trace.id();
        self.traces.entry(id).or_insert(trace);
        id
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn get(&self, id: TraceId) -> Option<&StackTrace> {
        self.traces.get(&id)
    }
}

impl StackTraceRepository for LeakStackTraceRepository {
    fn lookup(&self, hash: u64, id: TraceId) -> Option<&StackTrace> {
        self.traces.get(&id).filter(|t| t.hash() == hash)
    }

    fn for_each_trace(&self, visit: &mut dyn FnMut(&StackTrace) -> Result<()>) -> Result<()> {
        for trace in self.traces.values() {
            visit(trace)?;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.traces.clear();
    }
}
