mod common;

use common::{Harness, sample, trace};
use oldobj_checkpoint::checkpoint::format::TYPE_STACKTRACE;
use proptest::prelude::*;
use std::collections::HashSet;

/// `(trace id, resolved before the write, dead)`. Trace id 0 means none.
fn arb_sample() -> impl Strategy<Value = (u64, bool, bool)> {
    (0u64..=5, any::<bool>(), any::<bool>())
}

fn hash_of(id: u64) -> u64 {
    id * 0x101
}

fn record_traces(h: &mut Harness) {
    for id in 1..=5 {
        h.repo.record(trace(id, hash_of(id), &[(id, 1), (id + 10, 2)]));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn dedup_block_matches_pending_ids(samples in prop::collection::vec(arb_sample(), 0..40)) {
        let mut h = Harness::new();
        record_traces(&mut h);

        let mut early_ids = HashSet::new();
        for (i, &(id, _, dead)) in samples.iter().enumerate().filter(|(_, s)| s.1) {
            let s = h.push(sample(hash_of(id), id, i as i64 + 1));
            if dead {
                s.object_slot().clear();
            } else if id != 0 {
                early_ids.insert(id);
            }
        }
        h.resolve_all();

        // The rotation consumed the repository; the capture subsystem refills it.
        record_traces(&mut h);
        let mut pending_ids = HashSet::new();
        for (i, &(id, _, dead)) in samples.iter().enumerate().filter(|(_, s)| !s.1) {
            let s = h.push(sample(hash_of(id), id, i as i64 + 1));
            if dead {
                s.object_slot().clear();
            } else if id != 0 {
                pending_ids.insert(id);
            }
        }

        // Rotation commits nothing, so this is the whole epoch.
        let stats = h.write(true);
        prop_assert_eq!(stats.pending, pending_ids.len());
        prop_assert_eq!(stats.dedup_records, stats.pending);
        prop_assert_eq!(stats.stacktrace_blobs, early_ids.len());

        let checkpoints = h.take_checkpoints();
        let emitted: HashSet<u64> = common::stack_trace_ids(&checkpoints)
            .into_iter()
            .map(|id| id.as_u64())
            .collect();
        let expected: HashSet<u64> = early_ids.union(&pending_ids).copied().collect();
        prop_assert_eq!(emitted, expected);

        let stack_trace_records = common::count_records(&checkpoints, TYPE_STACKTRACE);
        prop_assert_eq!(stack_trace_records, early_ids.len() + pending_ids.len());
    }

    #[test]
    fn shared_blob_written_once_per_epoch(n in 1usize..20, writes in 1usize..5) {
        let mut h = Harness::new();
        h.repo.record(trace(7, 0x77, &[(1, 1)]));
        for t in 0..n {
            h.push(sample(0x77, 7, t as i64 + 1));
        }
        h.resolve_all();

        let first = h.write(true);
        prop_assert_eq!(first.samples, n);
        prop_assert_eq!(first.stacktrace_blobs, 1);
        for _ in 1..writes {
            prop_assert_eq!(h.write(true).stacktrace_blobs, 0);
        }

        // A new epoch makes the blob writable again, exactly once.
        let rotation = h.rotate();
        prop_assert_eq!(rotation.samples_reset, n);
        prop_assert_eq!(h.write(true).stacktrace_blobs, 1);
        prop_assert_eq!(h.write(true).stacktrace_blobs, 0);
    }
}
