//! Fixed-bucket hash table with a pluggable hash/equality strategy.

use crate::checkpoint::error::Result;
use smallvec::SmallVec;

/// Decides which bucket a key selects and when a stored entry matches a lookup.
///
/// The hash only picks the bucket; `equals` alone decides a match, so keys
/// whose hashes collide live side by side.
pub trait TableStrategy {
    type Key: Copy;

    fn hash(&self, key: &Self::Key) -> u64;

    fn equals(&self, lookup: &Self::Key, stored: &Self::Key) -> bool;
}

struct Entry<K, V> {
    hash: u64,
    key: K,
    value: V,
}

pub struct HashTable<S: TableStrategy, V> {
    strategy: S,
    buckets: Vec<SmallVec<[Entry<S::Key, V>; 1]>>,
    len: usize,
}

impl<S: TableStrategy, V> HashTable<S, V> {
    pub fn with_buckets(strategy: S, bucket_count: usize) -> Result<Self> {
        let bucket_count = bucket_count.max(1);
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(bucket_count)?;
        buckets.resize_with(bucket_count, SmallVec::new);
        Ok(Self {
            strategy,
            buckets,
            len: 0,
        })
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    pub fn lookup(&self, key: &S::Key) -> Option<&V> {
        let hash = self.strategy.hash(key);
        self.buckets[self.bucket_index(hash)]
            .iter()
            .find(|e| e.hash == hash && self.strategy.equals(key, &e.key))
            .map(|e| &e.value)
    }

    /// Insert without checking for an existing match; callers look up first.
    pub fn insert(&mut self, key: S::Key, value: V) -> Result<()> {
        let hash = self.strategy.hash(&key);
        let index = self.bucket_index(hash);
        let bucket = &mut self.buckets[index];
        bucket.try_reserve(1)?;
        bucket.push(Entry { hash, key, value });
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Everything lands in one bucket; equality by the second field only.
    struct Colliding;

    impl TableStrategy for Colliding {
        type Key = (u64, u64);
        fn hash(&self, key: &(u64, u64)) -> u64 {
            key.0
        }
        fn equals(&self, lookup: &(u64, u64), stored: &(u64, u64)) -> bool {
            lookup.1 == stored.1
        }
    }

    #[test]
    fn test_colliding_keys_coexist() {
        let mut table = HashTable::with_buckets(Colliding, 8).unwrap();
        table.insert((5, 1), "one").unwrap();
        table.insert((5, 2), "two").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup(&(5, 1)), Some(&"one"));
        assert_eq!(table.lookup(&(5, 2)), Some(&"two"));
        assert_eq!(table.lookup(&(5, 3)), None);
    }

    #[test]
    fn test_same_equality_different_hash_does_not_match() {
        let mut table = HashTable::with_buckets(Colliding, 8).unwrap();
        table.insert((5, 1), "one").unwrap();
        // Bucket 13 % 8 == 5, same bucket, but the full hash differs.
        assert_eq!(table.lookup(&(13, 1)), None);
    }

    #[test]
    fn test_zero_buckets_rounds_up() {
        let mut table = HashTable::with_buckets(Colliding, 0).unwrap();
        assert_eq!(table.bucket_count(), 1);
        assert!(table.is_empty());
        table.insert((u64::MAX, 9), 9).unwrap();
        assert_eq!(table.lookup(&(u64::MAX, 9)), Some(&9));
    }
}
