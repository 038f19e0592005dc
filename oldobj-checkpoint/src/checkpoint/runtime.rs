//! Seams into the managed runtime hosting the profiler.
//!
//! The passes never inspect the runtime directly; they go through these
//! traits. [`StandaloneRuntime`] implements all of them for embedders without
//! a managed runtime (and for tests).

use crate::checkpoint::error::{CheckpointError, Result};
use crate::checkpoint::format::{EdgeRecord, TYPE_REFERENCE_CHAIN};
use crate::checkpoint::ids::{ClassId, MethodId};
use crate::checkpoint::sample::ObjectRef;
use crate::checkpoint::writer::CheckpointWriter;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Lock serializing class unloading against metadata inspection.
#[derive(Debug, Default)]
pub struct ClassDataGraphLock {
    inner: Mutex<()>,
}

impl ClassDataGraphLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> ClassDataGraphGuard<'_> {
        ClassDataGraphGuard {
            _guard: self.inner.lock(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Proof that the class-data-graph lock is held. Operations that must not
/// race with class unloading take a reference to one.
pub struct ClassDataGraphGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

pub trait SafepointState {
    /// True while all mutator threads are stopped.
    fn is_at_safepoint(&self) -> bool;
}

/// State transitions of the calling thread.
pub trait ThreadTransition {
    /// Enter a state in which the runtime may bring this thread to a safepoint.
    fn enter_vm(&self);
    fn leave_vm(&self);
}

/// Scope during which the calling thread may be safepointed. Leaves on drop.
pub struct VmTransition<'a, T: ThreadTransition + ?Sized> {
    thread: &'a T,
}

impl<'a, T: ThreadTransition + ?Sized> VmTransition<'a, T> {
    pub fn enter(thread: &'a T) -> Self {
        thread.enter_vm();
        Self { thread }
    }
}

impl<T: ThreadTransition + ?Sized> Drop for VmTransition<'_, T> {
    fn drop(&mut self) {
        self.thread.leave_vm();
    }
}

pub trait ClassUnloading {
    /// Only meaningful while the class-data-graph lock is held.
    fn is_unloaded(&self, class_id: ClassId, lock: &ClassDataGraphGuard<'_>) -> bool;
}

/// Marks metadata that must survive class unloading because a leak report
/// refers to it. Tagging is idempotent.
pub trait MetadataTagger {
    fn tag_class(&self, class_id: ClassId);

    /// Tag a method together with its holder class.
    fn tag_method(&self, method_id: MethodId);
}

/// Everything the rotation pass needs from the hosting runtime.
pub trait ManagedRuntime: SafepointState + ThreadTransition + ClassUnloading + MetadataTagger {
    fn class_data_graph_lock(&self) -> &ClassDataGraphLock;
}

/// Keeps sampled objects reachable across one collection cycle.
pub trait ObjectMarker {
    fn mark(&mut self, object: ObjectRef);
}

impl ObjectMarker for Vec<ObjectRef> {
    fn mark(&mut self, object: ObjectRef) {
        self.push(object);
    }
}

/// Reference chains (paths to GC roots) built for the current samples.
pub trait ReferenceChainStore {
    fn is_empty(&self) -> bool;

    /// Serialize the chains into `writer`, returning the number of records.
    fn write_chains(&self, writer: &mut CheckpointWriter) -> Result<usize>;
}

/// A flat list of reference-chain edges, emitted as one block.
#[derive(Debug, Default)]
pub struct EdgeStore {
    edges: Vec<EdgeRecord>,
}

impl EdgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, edge: EdgeRecord) {
        self.edges.push(edge);
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }
}

impl ReferenceChainStore for EdgeStore {
    fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn write_chains(&self, writer: &mut CheckpointWriter) -> Result<usize> {
        let count = u32::try_from(self.edges.len())
            .map_err(|_| CheckpointError::Format("too many reference chain edges".into()))?;
        writer.write_type(TYPE_REFERENCE_CHAIN)?;
        writer.write_count(count)?;
        for edge in &self.edges {
            edge.write(writer)?;
        }
        Ok(self.edges.len())
    }
}

/// Runtime for hosts without safepoints or class unloading of their own.
///
/// Safepoints and unloading are driven explicitly, and every tag is counted
/// so callers can inspect what was retained.
#[derive(Debug, Default)]
pub struct StandaloneRuntime {
    lock: ClassDataGraphLock,
    at_safepoint: AtomicBool,
    vm_depth: AtomicUsize,
    vm_transitions: AtomicUsize,
    unloaded: Mutex<HashSet<ClassId>>,
    tagged_classes: Mutex<HashMap<ClassId, usize>>,
    tagged_methods: Mutex<HashMap<MethodId, usize>>,
}

impl StandaloneRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the world until the returned scope is dropped.
    pub fn begin_safepoint(&self) -> SafepointScope<'_> {
        self.at_safepoint.store(true, Ordering::Release);
        SafepointScope { runtime: self }
    }

    pub fn unload_class(&self, class_id: ClassId) {
        let _lock = self.lock.lock();
        self.unloaded.lock().insert(class_id);
    }

    pub fn is_in_vm(&self) -> bool {
        self.vm_depth.load(Ordering::Acquire) > 0
    }

    /// Number of times a thread entered the safepointable state.
    pub fn vm_transitions(&self) -> usize {
        self.vm_transitions.load(Ordering::Relaxed)
    }

    pub fn class_tag_count(&self, class_id: ClassId) -> usize {
        self.tagged_classes.lock().get(&class_id).copied().unwrap_or(0)
    }

    pub fn method_tag_count(&self, method_id: MethodId) -> usize {
        self.tagged_methods.lock().get(&method_id).copied().unwrap_or(0)
    }

    pub fn tagged_method_count(&self) -> usize {
        self.tagged_methods.lock().len()
    }
}

pub struct SafepointScope<'a> {
    runtime: &'a StandaloneRuntime,
}

impl Drop for SafepointScope<'_> {
    fn drop(&mut self) {
        self.runtime.at_safepoint.store(false, Ordering::Release);
    }
}

impl SafepointState for StandaloneRuntime {
    fn is_at_safepoint(&self) -> bool {
        self.at_safepoint.load(Ordering::Acquire)
    }
}

impl ThreadTransition for StandaloneRuntime {
    fn enter_vm(&self) {
        self.vm_depth.fetch_add(1, Ordering::AcqRel);
        self.vm_transitions.fetch_add(1, Ordering::Relaxed);
    }

    fn leave_vm(&self) {
        self.vm_depth.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ClassUnloading for StandaloneRuntime {
    fn is_unloaded(&self, class_id: ClassId, _lock: &ClassDataGraphGuard<'_>) -> bool {
        self.unloaded.lock().contains(&class_id)
    }
}

impl MetadataTagger for StandaloneRuntime {
    fn tag_class(&self, class_id: ClassId) {
        *self.tagged_classes.lock().entry(class_id).or_insert(0) += 1;
    }

    fn tag_method(&self, method_id: MethodId) {
        self.tag_class(method_id.class_id());
        *self.tagged_methods.lock().entry(method_id).or_insert(0) += 1;
    }
}

impl ManagedRuntime for StandaloneRuntime {
    fn class_data_graph_lock(&self) -> &ClassDataGraphLock {
        &self.lock
    }
}
