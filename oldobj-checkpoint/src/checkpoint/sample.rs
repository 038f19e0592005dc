//! Sampled live objects, as maintained by the sampler.
//!
//! The sampler owns the list: newest first, linked towards older samples.
//! The checkpoint passes only read sample identity and attach blobs.

use crate::checkpoint::blob::BlobHandle;
use crate::checkpoint::ids::{ClassId, TraceId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub type SampleRef = Arc<ObjectSample>;

/// A reference to a sampled heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub address: usize,
    pub class_id: ClassId,
}

/// Slot holding a sampled object that the collector may clear at any time.
///
/// A cleared slot reads as `None`. The mark pass keeps the object alive
/// across one collection cycle.
#[derive(Debug)]
pub struct ObjectSlot {
    address: AtomicUsize,
    class_id: ClassId,
}

impl ObjectSlot {
    pub fn new(object: ObjectRef) -> Self {
        Self {
            address: AtomicUsize::new(object.address),
            class_id: object.class_id,
        }
    }

    pub fn empty() -> Self {
        Self {
            address: AtomicUsize::new(0),
            class_id: ClassId::default(),
        }
    }

    pub fn get(&self) -> Option<ObjectRef> {
        match self.address.load(Ordering::Acquire) {
            0 => None,
            address => Some(ObjectRef {
                address,
                class_id: self.class_id,
            }),
        }
    }

    pub fn is_live(&self) -> bool {
        self.address.load(Ordering::Acquire) != 0
    }

    /// Called by the collector once the object is unreachable.
    pub fn clear(&self) {
        self.address.store(0, Ordering::Release);
    }
}

/// One sampled object.
#[derive(Debug)]
pub struct ObjectSample {
    stack_trace_id: TraceId,
    stack_trace_hash: u64,
    thread_id: TraceId,
    virtual_thread: bool,
    allocation_time: i64,
    object: ObjectSlot,
    next: Option<SampleRef>,
    stacktrace: OnceLock<BlobHandle>,
    thread: OnceLock<BlobHandle>,
    type_set: OnceLock<BlobHandle>,
}

impl ObjectSample {
    pub fn builder() -> ObjectSampleBuilder {
        ObjectSampleBuilder::default()
    }

    pub fn stack_trace_id(&self) -> TraceId {
        self.stack_trace_id
    }

    pub fn stack_trace_hash(&self) -> u64 {
        self.stack_trace_hash
    }

    pub fn has_stack_trace_id(&self) -> bool {
        !self.stack_trace_id.is_none()
    }

    pub fn thread_id(&self) -> TraceId {
        self.thread_id
    }

    pub fn is_virtual_thread(&self) -> bool {
        self.virtual_thread
    }

    pub fn allocation_time(&self) -> i64 {
        self.allocation_time
    }

    pub fn object(&self) -> Option<ObjectRef> {
        self.object.get()
    }

    pub fn object_slot(&self) -> &ObjectSlot {
        &self.object
    }

    pub fn is_dead(&self) -> bool {
        !self.object.is_live()
    }

    pub fn is_alive_and_older_than(&self, timestamp: i64) -> bool {
        !self.is_dead() && self.allocation_time < timestamp
    }

    /// The next older sample.
    pub fn next(&self) -> Option<&ObjectSample> {
        self.next.as_deref()
    }

    pub fn stacktrace(&self) -> Option<&BlobHandle> {
        self.stacktrace.get()
    }

    pub fn has_stacktrace(&self) -> bool {
        self.stacktrace.get().is_some()
    }

    /// Attach the stack-trace blob. Returns `false` if one was already attached.
    pub fn set_stacktrace(&self, blob: BlobHandle) -> bool {
        self.stacktrace.set(blob).is_ok()
    }

    pub fn thread(&self) -> Option<&BlobHandle> {
        self.thread.get()
    }

    pub fn set_thread(&self, blob: BlobHandle) -> bool {
        self.thread.set(blob).is_ok()
    }

    pub fn type_set(&self) -> Option<&BlobHandle> {
        self.type_set.get()
    }

    pub fn has_type_set(&self) -> bool {
        self.type_set.get().is_some()
    }

    pub fn set_type_set(&self, blob: BlobHandle) -> bool {
        self.type_set.set(blob).is_ok()
    }
}

impl Drop for ObjectSample {
    // Unlink iteratively so dropping a long chain does not recurse.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(sample) = next {
            match Arc::try_unwrap(sample) {
                Ok(mut sample) => next = sample.next.take(),
                Err(_) => break,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ObjectSampleBuilder {
    stack_trace_id: TraceId,
    stack_trace_hash: u64,
    thread_id: TraceId,
    virtual_thread: bool,
    allocation_time: i64,
    object: Option<ObjectRef>,
    thread: Option<BlobHandle>,
}

impl ObjectSampleBuilder {
    pub fn stack_trace(mut self, hash: u64, id: TraceId) -> Self {
        self.stack_trace_hash = hash;
        self.stack_trace_id = id;
        self
    }

    pub fn thread(mut self, thread_id: TraceId, is_virtual: bool) -> Self {
        self.thread_id = thread_id;
        self.virtual_thread = is_virtual;
        self
    }

    pub fn thread_blob(mut self, blob: BlobHandle) -> Self {
        self.thread = Some(blob);
        self
    }

    pub fn allocated_at(mut self, time: i64) -> Self {
        self.allocation_time = time;
        self
    }

    pub fn object(mut self, object: ObjectRef) -> Self {
        self.object = Some(object);
        self
    }

    pub fn build(self) -> ObjectSample {
        let thread = OnceLock::new();
        if let Some(blob) = self.thread {
            let _ = thread.set(blob);
        }
        ObjectSample {
            stack_trace_id: self.stack_trace_id,
            stack_trace_hash: self.stack_trace_hash,
            thread_id: self.thread_id,
            virtual_thread: self.virtual_thread,
            allocation_time: self.allocation_time,
            object: self.object.map_or_else(ObjectSlot::empty, ObjectSlot::new),
            next: None,
            stacktrace: OnceLock::new(),
            thread,
            type_set: OnceLock::new(),
        }
    }
}

/// Walks samples from `from` towards older ones, stopping before `end`.
pub struct Samples<'a> {
    current: Option<&'a ObjectSample>,
    end: Option<*const ObjectSample>,
}

impl<'a> Iterator for Samples<'a> {
    type Item = &'a ObjectSample;

    fn next(&mut self) -> Option<&'a ObjectSample> {
        let sample = self.current?;
        if self.end == Some(sample as *const ObjectSample) {
            self.current = None;
            return None;
        }
        self.current = sample.next();
        Some(sample)
    }
}

pub fn samples<'a>(from: Option<&'a ObjectSample>, end: Option<&ObjectSample>) -> Samples<'a> {
    Samples {
        current: from,
        end: end.map(|e| e as *const ObjectSample),
    }
}

/// The sampler, as far as the checkpoint passes see it.
pub trait ObjectSampler {
    /// Newest sample, the head of the list.
    fn last(&self) -> Option<&SampleRef>;

    /// High-water mark: this sample and everything older has been resolved.
    fn last_resolved(&self) -> Option<&SampleRef>;

    fn set_last_resolved(&mut self, sample: Option<SampleRef>);

    /// Timestamp of the last collector sweep.
    fn last_sweep(&self) -> i64;

    fn has_unresolved_entry(&self) -> bool {
        match (self.last(), self.last_resolved()) {
            (None, _) => false,
            (Some(last), Some(resolved)) => !Arc::ptr_eq(last, resolved),
            (Some(_), None) => true,
        }
    }

    /// Samples newer than the resolved boundary.
    fn unresolved(&self) -> Samples<'_> {
        samples(
            self.last().map(|s| &**s),
            self.last_resolved().map(|s| &**s),
        )
    }

    /// Samples at or older than the resolved boundary.
    fn resolved(&self) -> Samples<'_> {
        samples(self.last_resolved().map(|s| &**s), None)
    }

    fn all(&self) -> Samples<'_> {
        samples(self.last().map(|s| &**s), None)
    }
}

/// A plain in-process sample list.
#[derive(Debug, Default)]
pub struct SampleChain {
    last: Option<SampleRef>,
    last_resolved: Option<SampleRef>,
    last_sweep: i64,
    len: usize,
}

impl SampleChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `sample` in as the newest entry.
    pub fn push(&mut self, mut sample: ObjectSample) -> SampleRef {
        sample.next = self.last.take();
        let sample = Arc::new(sample);
        self.last = Some(sample.clone());
        self.len += 1;
        sample
    }

    pub fn set_last_sweep(&mut self, timestamp: i64) {
        self.last_sweep = timestamp;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ObjectSampler for SampleChain {
    fn last(&self) -> Option<&SampleRef> {
        self.last.as_ref()
    }

    fn last_resolved(&self) -> Option<&SampleRef> {
        self.last_resolved.as_ref()
    }

    fn set_last_resolved(&mut self, sample: Option<SampleRef>) {
        self.last_resolved = sample;
    }

    fn last_sweep(&self) -> i64 {
        self.last_sweep
    }
}
