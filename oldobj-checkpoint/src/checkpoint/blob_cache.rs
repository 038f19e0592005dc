use crate::checkpoint::blob::BlobHandle;
use crate::checkpoint::error::{CheckpointError, Pass, Result};
use crate::checkpoint::ids::TraceId;
use crate::checkpoint::sample::ObjectSample;
use crate::checkpoint::table::{HashTable, TableStrategy};

/// Cache key: the stack-trace hash picks the bucket, the id decides equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackTraceKey {
    pub hash: u64,
    pub id: TraceId,
}

impl StackTraceKey {
    pub fn of(sample: &ObjectSample) -> Self {
        Self {
            hash: sample.stack_trace_hash(),
            id: sample.stack_trace_id(),
        }
    }
}

pub struct StackTraceIdentity;

impl TableStrategy for StackTraceIdentity {
    type Key = StackTraceKey;

    fn hash(&self, key: &StackTraceKey) -> u64 {
        key.hash
    }

    fn equals(&self, lookup: &StackTraceKey, stored: &StackTraceKey) -> bool {
        lookup.id == stored.id
    }
}

/// Per-resolution-pass map from stack trace to its serialized blob.
/// Discarded with the pass; never evicts.
pub struct BlobCache {
    table: HashTable<StackTraceIdentity, BlobHandle>,
}

impl BlobCache {
    pub fn new(bucket_count: usize) -> Result<Self> {
        Ok(Self {
            table: HashTable::with_buckets(StackTraceIdentity, bucket_count)?,
        })
    }

    pub fn get(&self, sample: &ObjectSample) -> Result<Option<BlobHandle>> {
        let key = Self::key(sample)?;
        Ok(self.table.lookup(&key).cloned())
    }

    /// Insert the blob for `sample`'s stack trace. A second insert for the
    /// same id is a protocol violation.
    pub fn put(&mut self, sample: &ObjectSample, blob: &BlobHandle) -> Result<()> {
        let key = Self::key(sample)?;
        if self.table.lookup(&key).is_some() {
            return Err(CheckpointError::invariant(
                Pass::Rotation,
                format!(
                    "stack trace {} (hash {:#x}) already cached",
                    key.id.as_u64(),
                    key.hash
                ),
            ));
        }
        self.table.insert(key, blob.clone())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    fn key(sample: &ObjectSample) -> Result<StackTraceKey> {
        let key = StackTraceKey::of(sample);
        if key.id.is_none() {
            return Err(CheckpointError::invariant(
                Pass::Rotation,
                "blob cache used with a sample lacking a stack trace id",
            ));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::blob::BlobKind;
    use crate::checkpoint::sample::ObjectSample;

    fn sample(hash: u64, id: u64) -> ObjectSample {
        ObjectSample::builder().stack_trace(hash, TraceId(id)).build()
    }

    fn blob(tag: u8) -> BlobHandle {
        BlobHandle::new(BlobKind::StackTrace, vec![tag])
    }

    #[test]
    fn test_get_after_put() {
        let mut cache = BlobCache::new(16).unwrap();
        let s = sample(0xabc, 42);
        assert!(cache.get(&s).unwrap().is_none());
        let b = blob(1);
        cache.put(&s, &b).unwrap();
        assert!(cache.get(&s).unwrap().unwrap().ptr_eq(&b));
        // Another sample with the same trace finds the same blob.
        assert!(cache.get(&sample(0xabc, 42)).unwrap().unwrap().ptr_eq(&b));
    }

    #[test]
    fn test_hash_collision_keeps_entries_apart() {
        let mut cache = BlobCache::new(16).unwrap();
        let a = sample(7, 1);
        let b = sample(7, 2);
        let blob_a = blob(1);
        let blob_b = blob(2);
        cache.put(&a, &blob_a).unwrap();
        assert!(cache.get(&b).unwrap().is_none());
        cache.put(&b, &blob_b).unwrap();
        assert!(cache.get(&a).unwrap().unwrap().ptr_eq(&blob_a));
        assert!(cache.get(&b).unwrap().unwrap().ptr_eq(&blob_b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_double_put_is_invariant_violation() {
        let mut cache = BlobCache::new(4).unwrap();
        let s = sample(9, 3);
        cache.put(&s, &blob(1)).unwrap();
        let err = cache.put(&s, &blob(2)).unwrap_err();
        assert!(err.is_invariant());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_id_is_rejected() {
        let cache = BlobCache::new(4).unwrap();
        let s = ObjectSample::builder().build();
        assert!(cache.get(&s).unwrap_err().is_invariant());
    }

    #[test]
    fn test_cache_holds_a_reference() {
        let mut cache = BlobCache::new(4).unwrap();
        let b = blob(1);
        cache.put(&sample(1, 1), &b).unwrap();
        assert_eq!(b.ref_count(), 2);
        drop(cache);
        assert_eq!(b.ref_count(), 1);
    }
}
