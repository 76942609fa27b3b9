//! Request tracking for synchronous sends over an asynchronous transport
//!
//! The tracker correlates outbound request ids with counted responses.
//! A caller registers how many responses it expects, sends, and waits; the
//! receive path reports each arriving reply. Only the count matters —
//! replies may arrive in any order and from any task, and response payloads
//! are aggregated by the caller if at all.
//!
//! Late and duplicate replies are a tolerated race: notifications for
//! unknown or already-satisfied ids are dropped with a trace log, never an
//! error, and the actual count can never exceed the expected count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use crate::envelope::MessageMeta;

// ----------------------------------------------------------------------------
// Track Entry
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TrackEntry {
    expected: u32,
    actual: u32,
    created_at: Instant,
}

impl TrackEntry {
    fn satisfied(&self) -> bool {
        self.actual == self.expected
    }
}

// ----------------------------------------------------------------------------
// Message Tracker
// ----------------------------------------------------------------------------

/// Correlates request ids with expected/actual response counts
///
/// Also owns the process-wide request id counter: every outbound request id,
/// tracked or not, is drawn from [`MessageTracker::next_request_id`]. Ids
/// are never reused; wraparound is not a concern at realistic scales.
#[derive(Debug, Default)]
pub struct MessageTracker {
    entries: Mutex<HashMap<u64, TrackEntry>>,
    next_request_id: AtomicU64,
    satisfied: Notify,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh request id without registering a tracker entry
    ///
    /// Used by fire-and-forget sends; callers that need confirmation go
    /// through [`MessageTracker::add_track`] instead.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Register a new tracked request expecting `expected` responses
    ///
    /// Returns the freshly allocated request id to stamp into the outbound
    /// envelope. An expectation of zero is legal and immediately satisfied.
    pub fn add_track(&self, expected: u32) -> u64 {
        let request_id = self.next_request_id();
        let entry = TrackEntry {
            expected,
            actual: 0,
            created_at: Instant::now(),
        };
        self.entries
            .lock()
            .expect("tracker mutex poisoned")
            .insert(request_id, entry);
        request_id
    }

    /// Non-blocking point check: has the request collected every response?
    ///
    /// False for unknown ids.
    pub fn check_track(&self, request_id: u64) -> bool {
        self.entries
            .lock()
            .expect("tracker mutex poisoned")
            .get(&request_id)
            .map(|e| e.satisfied())
            .unwrap_or(false)
    }

    /// Record one arriving response for the id stamped in `meta`
    ///
    /// Unknown ids (entry already reaped, or a duplicate/stale reply) are
    /// dropped silently; a reply beyond the expected count is clamped. Both
    /// are tolerated races, not errors.
    pub fn notify_arrival(&self, meta: &MessageMeta) {
        let request_id = meta.request_id;
        let newly_satisfied = {
            let mut entries = self.entries.lock().expect("tracker mutex poisoned");
            match entries.get_mut(&request_id) {
                Some(entry) if entry.actual < entry.expected => {
                    entry.actual += 1;
                    entry.satisfied()
                }
                Some(_) => {
                    trace!(
                        request_id,
                        command = meta.command.as_str(),
                        "stale reply for satisfied request"
                    );
                    false
                }
                None => {
                    trace!(
                        request_id,
                        command = meta.command.as_str(),
                        "reply for unknown request"
                    );
                    false
                }
            }
        };
        if newly_satisfied {
            self.satisfied.notify_waiters();
        }
    }

    /// Wait until the request is satisfied or the timeout elapses
    ///
    /// Returns true iff every expected response arrived strictly before the
    /// timeout. A timed-out wait abandons the entry; it stays in the table
    /// (harmlessly absorbing late replies) until removed or purged.
    pub async fn wait(&self, request_id: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.satisfied.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a notification landing
            // between the check and the await is not lost.
            notified.as_mut().enable();

            if self.check_track(request_id) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return self.check_track(request_id);
            }
        }
    }

    /// Remove a tracked request, returning its final (expected, actual)
    pub fn remove_track(&self, request_id: u64) -> Option<(u32, u32)> {
        self.entries
            .lock()
            .expect("tracker mutex poisoned")
            .remove(&request_id)
            .map(|e| (e.expected, e.actual))
    }

    /// Drop entries older than `max_age`, returning how many were removed
    ///
    /// Reclaims entries abandoned by timed-out or failed sends so the table
    /// does not grow without bound under high request churn.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(max_age) else {
            return 0;
        };
        let mut entries = self.entries.lock().expect("tracker mutex poisoned");
        let before = entries.len();
        entries.retain(|_, e| e.created_at > cutoff);
        before - entries.len()
    }

    /// Number of live tracker entries
    pub fn tracked_count(&self) -> usize {
        self.entries.lock().expect("tracker mutex poisoned").len()
    }

    /// Snapshot of tracker health for diagnostics
    pub fn statistics(&self) -> TrackerStatistics {
        let entries = self.entries.lock().expect("tracker mutex poisoned");
        let mut stats = TrackerStatistics {
            total: entries.len(),
            ..TrackerStatistics::default()
        };
        for entry in entries.values() {
            if entry.satisfied() {
                stats.satisfied += 1;
            } else {
                stats.pending += 1;
            }
        }
        stats
    }
}

// ----------------------------------------------------------------------------
// Tracker Statistics
// ----------------------------------------------------------------------------

/// Counts of live tracker entries by completion state
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackerStatistics {
    pub total: usize,
    pub satisfied: usize,
    pub pending: usize,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageCommand;
    use crate::types::NodeRole;
    use std::sync::Arc;

    fn reply_meta(request_id: u64) -> MessageMeta {
        let mut meta = MessageMeta::new(MessageCommand::SendData, NodeRole::Server, 0);
        meta.request_id = request_id;
        meta
    }

    #[test]
    fn test_satisfied_after_exactly_n_arrivals() {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(3);

        for _ in 0..2 {
            tracker.notify_arrival(&reply_meta(id));
            assert!(!tracker.check_track(id));
        }
        tracker.notify_arrival(&reply_meta(id));
        assert!(tracker.check_track(id));

        // Permanently true, and a stray fourth reply is clamped.
        tracker.notify_arrival(&reply_meta(id));
        assert!(tracker.check_track(id));
        let (expected, actual) = tracker.remove_track(id).unwrap();
        assert_eq!((expected, actual), (3, 3));
    }

    #[test]
    fn test_unknown_id_does_not_disturb_others() {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(1);
        tracker.notify_arrival(&reply_meta(id + 1000));
        assert!(!tracker.check_track(id));
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn test_zero_expectation_is_immediately_satisfied() {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(0);
        assert!(tracker.check_track(id));
    }

    #[test]
    fn test_ids_are_distinct_across_threads() {
        use std::collections::HashSet;

        const THREADS: usize = 8;
        const IDS_PER_THREAD: usize = 200;

        let tracker = Arc::new(MessageTracker::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    (0..IDS_PER_THREAD)
                        .map(|_| tracker.add_track(1))
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "request id {id} issued twice");
            }
        }
        assert_eq!(seen.len(), THREADS * IDS_PER_THREAD);
    }

    #[tokio::test]
    async fn test_wait_returns_when_satisfied() {
        let tracker = Arc::new(MessageTracker::new());
        let id = tracker.add_track(3);

        for _ in 0..3 {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker.notify_arrival(&reply_meta(id));
            });
        }

        assert!(tracker.wait(id, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let tracker = MessageTracker::new();
        let id = tracker.add_track(1);
        let started = Instant::now();
        assert!(!tracker.wait(id, Duration::from_millis(200)).await);
        assert!(started.elapsed() >= Duration::from_millis(200));
        // The abandoned entry still absorbs a late reply.
        tracker.notify_arrival(&reply_meta(id));
        assert!(tracker.check_track(id));
    }

    #[test]
    fn test_purge_reclaims_abandoned_entries() {
        let tracker = MessageTracker::new();
        let _stale = tracker.add_track(1);
        std::thread::sleep(Duration::from_millis(20));
        let fresh = tracker.add_track(1);

        let removed = tracker.purge_older_than(Duration::from_millis(10));
        assert_eq!(removed, 1);
        assert_eq!(tracker.tracked_count(), 1);
        tracker.notify_arrival(&reply_meta(fresh));
        assert!(tracker.check_track(fresh));
    }

    #[test]
    fn test_statistics() {
        let tracker = MessageTracker::new();
        let a = tracker.add_track(1);
        let _b = tracker.add_track(2);
        tracker.notify_arrival(&reply_meta(a));

        let stats = tracker.statistics();
        assert_eq!(
            stats,
            TrackerStatistics {
                total: 2,
                satisfied: 1,
                pending: 1,
            }
        );
    }
}
