use crate::checkpoint::error::Result;
use std::collections::HashSet;
use std::hash::Hash;

/// Append-only set of ids, valid for whatever scope owns it.
///
/// Pass-scoped instances are created at pass entry and dropped at pass exit;
/// the exited-thread instance lives until an explicit safepoint clear. No
/// internal locking: the owner provides exclusion.
#[derive(Debug)]
pub struct ScopedIdSet<T> {
    ids: HashSet<T>,
}

impl<T: Copy + Eq + Hash> ScopedIdSet<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut ids = HashSet::new();
        ids.try_reserve(capacity)?;
        Ok(Self { ids })
    }

    /// Returns `true` if `id` was not present before.
    pub fn add(&mut self, id: T) -> Result<bool> {
        if self.ids.contains(&id) {
            return Ok(false);
        }
        self.ids.try_reserve(1)?;
        Ok(self.ids.insert(id))
    }

    pub fn contains(&self, id: T) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
