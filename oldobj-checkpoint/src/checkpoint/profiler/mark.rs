use super::LeakProfiler;
use crate::checkpoint::runtime::ObjectMarker;
use crate::checkpoint::sample::ObjectSampler;

impl LeakProfiler {
    /// Hand every live sample in the emission window to `marker` so it stays
    /// reachable through the coming collection. Returns the number marked.
    ///
    /// Blob state is left untouched.
    pub fn save_mark_words(
        &self,
        sampler: &dyn ObjectSampler,
        marker: &mut dyn ObjectMarker,
        emit_all: bool,
    ) -> usize {
        if sampler.last().is_none() {
            return 0;
        }
        let last_sweep = if emit_all {
            i64::MAX
        } else {
            sampler.last_sweep()
        };
        let mut marked = 0;
        for sample in sampler.all() {
            if !sample.is_alive_and_older_than(last_sweep) {
                continue;
            }
            if let Some(object) = sample.object() {
                marker.mark(object);
                marked += 1;
            }
        }
        tracing::debug!(target: "oldobj_checkpoint", marked, emit_all, "saved mark words");
        marked
    }
}
