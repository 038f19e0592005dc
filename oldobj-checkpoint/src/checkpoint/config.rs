use crate::checkpoint::error::Result;
use serde::Deserialize;

/// Minimum size of the pass-scoped id sets.
pub const INITIAL_ID_SET_SIZE: usize = 431;

/// Tunables for the leak profiler's checkpoint passes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeakProfilerOptions {
    /// Capacity of the sampler's queue. Sizes the blob cache and the pass-scoped sets.
    pub old_object_queue_size: usize,
    /// Initial capacity of the exited-thread set and the method dedup set.
    pub initial_id_set_size: usize,
    /// Chunk size after which [`RotatingSink`](crate::checkpoint::RotatingSink) asks for a rotation.
    pub max_chunk_size: u64,
    /// Total size of all chunks kept on disk.
    pub max_total_size: u64,
}

impl Default for LeakProfilerOptions {
    fn default() -> Self {
        Self {
            old_object_queue_size: 256,
            initial_id_set_size: INITIAL_ID_SET_SIZE,
            max_chunk_size: 12 * 1024 * 1024,
            max_total_size: 256 * 1024 * 1024,
        }
    }
}

impl LeakProfilerOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_old_object_queue_size(mut self, size: usize) -> Self {
        self.old_object_queue_size = size;
        self
    }

    pub fn with_initial_id_set_size(mut self, size: usize) -> Self {
        self.initial_id_set_size = size;
        self
    }

    pub fn with_max_chunk_size(mut self, size: u64) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_max_total_size(mut self, size: u64) -> Self {
        self.max_total_size = size;
        self
    }

    /// Capacity for the sets created by each pass.
    pub fn pass_set_size(&self) -> usize {
        self.old_object_queue_size.max(INITIAL_ID_SET_SIZE)
    }
}
