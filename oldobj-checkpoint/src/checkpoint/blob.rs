//! Immutable, reference-counted, pre-serialized checkpoint blocks.

use crate::checkpoint::error::Result;
use crate::checkpoint::writer::CheckpointWriter;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What a blob describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    StackTrace,
    Thread,
    TypeSet,
}

/// One serialized type block (stack trace, thread descriptor or type-usage set).
///
/// The bytes never change once built. The written flag is per epoch: a blob
/// shared by many samples reaches the stream once until the flag is reset at
/// the next rotation.
pub struct Blob {
    kind: BlobKind,
    bytes: Box<[u8]>,
    written: AtomicBool,
}

impl Blob {
    pub fn kind(&self) -> BlobKind {
        self.kind
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    /// Append the bytes to `writer` unless already written this epoch.
    /// Returns whether anything was written.
    pub fn exclusive_write(&self, writer: &mut CheckpointWriter) -> Result<bool> {
        if self.written.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        if let Err(e) = writer.write_bytes(&self.bytes) {
            // Nothing reached the writer, so the blob is still owed this epoch.
            self.written.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }

    /// Make the blob eligible for emission again (start of a new epoch).
    pub fn reset_write_state(&self) {
        self.written.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .field("written", &self.is_written())
            .finish()
    }
}

/// Shared handle to a [`Blob`]. Cloning bumps the reference count; the blob is
/// freed when the cache, every sample and every writer have dropped theirs.
#[derive(Debug, Clone)]
pub struct BlobHandle(Arc<Blob>);

impl BlobHandle {
    pub fn new(kind: BlobKind, bytes: impl Into<Box<[u8]>>) -> Self {
        BlobHandle(Arc::new(Blob {
            kind,
            bytes: bytes.into(),
            written: AtomicBool::new(false),
        }))
    }

    /// True if both handles refer to the same blob.
    pub fn ptr_eq(&self, other: &BlobHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles to this blob.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Deref for BlobHandle {
    type Target = Blob;

    fn deref(&self) -> &Blob {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_write_once_per_epoch() {
        let blob = BlobHandle::new(BlobKind::Thread, vec![1u8, 2, 3]);
        let mut writer = CheckpointWriter::new();
        assert!(blob.exclusive_write(&mut writer).unwrap());
        assert!(!blob.exclusive_write(&mut writer).unwrap());
        assert_eq!(writer.as_bytes(), &[1, 2, 3]);

        blob.reset_write_state();
        assert!(!blob.is_written());
        assert!(blob.exclusive_write(&mut writer).unwrap());
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_shared_handles_share_write_state() {
        let a = BlobHandle::new(BlobKind::StackTrace, vec![9u8; 4]);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.ref_count(), 2);

        let mut writer = CheckpointWriter::new();
        assert!(b.exclusive_write(&mut writer).unwrap());
        assert!(a.is_written());
        assert!(!a.exclusive_write(&mut writer).unwrap());
        assert_eq!(writer.len(), 4);

        drop(b);
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_distinct_blobs_with_equal_bytes_are_not_shared() {
        let a = BlobHandle::new(BlobKind::TypeSet, vec![0u8; 2]);
        let b = BlobHandle::new(BlobKind::TypeSet, vec![0u8; 2]);
        assert!(!a.ptr_eq(&b));
        let mut writer = CheckpointWriter::new();
        a.exclusive_write(&mut writer).unwrap();
        assert!(!b.is_written());
    }
}
