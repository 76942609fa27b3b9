//! Property-based tests for the request tracker
//!
//! These pin down the counting semantics: satisfaction happens at exactly
//! the expected number of arrivals, stray arrivals are clamped, and entries
//! never interfere with each other regardless of interleaving.

use proptest::prelude::*;

use latch_core::{MessageCommand, MessageMeta, MessageTracker, NodeRole};

fn reply_meta(request_id: u64) -> MessageMeta {
    let mut meta = MessageMeta::new(MessageCommand::SendData, NodeRole::Server, 0);
    meta.request_id = request_id;
    meta
}

proptest! {
    /// check_track flips to true at exactly `expected` arrivals and stays true.
    #[test]
    fn satisfaction_at_exact_count(expected in 1u32..50, extra in 0u32..10) {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(expected);

        for i in 0..expected {
            prop_assert!(!tracker.check_track(id), "satisfied early at {i}/{expected}");
            tracker.notify_arrival(&reply_meta(id));
        }
        prop_assert!(tracker.check_track(id));

        for _ in 0..extra {
            tracker.notify_arrival(&reply_meta(id));
            prop_assert!(tracker.check_track(id));
        }

        let (exp, act) = tracker.remove_track(id).unwrap();
        prop_assert_eq!(exp, expected);
        prop_assert_eq!(act, expected, "stray arrivals must be clamped");
    }

    /// Arrivals for one id never move another id's counters.
    #[test]
    fn entries_are_independent(expected_a in 1u32..20, expected_b in 1u32..20) {
        let tracker = MessageTracker::new();
        let a = tracker.add_track(expected_a);
        let b = tracker.add_track(expected_b);

        for _ in 0..expected_a {
            tracker.notify_arrival(&reply_meta(a));
        }
        prop_assert!(tracker.check_track(a));
        prop_assert!(!tracker.check_track(b));

        let (_, act_b) = tracker.remove_track(b).unwrap();
        prop_assert_eq!(act_b, 0);
    }

    /// Notifications for ids that were never registered change nothing.
    #[test]
    fn unknown_ids_are_inert(expected in 1u32..20, bogus_offset in 1000u64..2000) {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(expected);

        tracker.notify_arrival(&reply_meta(id + bogus_offset));
        prop_assert!(!tracker.check_track(id));
        prop_assert_eq!(tracker.tracked_count(), 1);
    }

    /// Ids from interleaved allocations are strictly increasing and unique.
    #[test]
    fn ids_monotonic(count in 1usize..200) {
        let tracker = MessageTracker::new();
        let mut last = 0u64;
        for _ in 0..count {
            let id = tracker.add_track(1);
            prop_assert!(id > last, "id {id} not greater than {last}");
            last = id;
        }
    }
}
