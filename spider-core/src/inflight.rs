//! The in-flight table: tracks dispatched-but-unresolved requests and
//! sweeps timeouts.
//!
//! Combines a hash index for O(1) lookup with an insertion-ordered view for
//! an efficient timeout sweep, per the design note in the specification
//! (a hash map plus a small ordered index keyed by enqueue time). Both
//! views live behind one `Mutex` so `enqueue`/`dequeue`/`sweep_timeouts`
//! are mutually atomic, matching the requirement that the dispatcher
//! (insert), the consumer (remove), and the timeout sweep (remove) never
//! observe a torn state.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::request::Request;

/// One in-flight entry: the dispatched request plus when it was enqueued.
struct Entry {
    request: Request,
    enqueued_at: Instant,
    seq: u64,
}

struct Inner {
    /// Hash -> (enqueued_at, seq), for O(1) existence checks and removal by
    /// hash.
    by_hash: std::collections::HashMap<String, (Instant, u64)>,
    /// (enqueued_at, seq) -> entry, ordered by insertion so a timeout sweep
    /// can walk the oldest entries first. `seq` breaks ties between entries
    /// enqueued in the same `Instant` tick.
    by_order: BTreeMap<(Instant, u64), Entry>,
    next_seq: u64,
}

/// Map from request hash to `(Request, enqueued_at)`. At most one entry
/// exists per hash at any instant.
pub struct RequestedQueue {
    inner: Mutex<Inner>,
}

impl Default for RequestedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestedQueue {
    /// Creates an empty in-flight table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_hash: std::collections::HashMap::new(),
                by_order: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Inserts `request` iff no entry with its hash already exists.
    /// Returns `true` on insert, `false` if a duplicate is already in
    /// flight (the caller must not dispatch it again).
    #[must_use]
    pub fn enqueue(&self, request: Request) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if inner.by_hash.contains_key(&request.hash) {
            return false;
        }
        let now = Instant::now();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_hash.insert(request.hash.clone(), (now, seq));
        inner.by_order.insert(
            (now, seq),
            Entry {
                request,
                enqueued_at: now,
                seq,
            },
        );
        true
    }

    /// Removes and returns the entry for `hash`, or `None` if absent (a
    /// stale or duplicate response, silently dropped by the caller).
    #[must_use]
    pub fn dequeue(&self, hash: &str) -> Option<Request> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (enqueued_at, seq) = inner.by_hash.remove(hash)?;
        inner
            .by_order
            .remove(&(enqueued_at, seq))
            .map(|entry| entry.request)
    }

    /// Removes and returns every entry whose age exceeds `timeout`, oldest
    /// first (insertion order).
    pub fn sweep_timeouts(&self, timeout: Duration) -> Vec<Request> {
        let mut inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let expired_keys: Vec<(Instant, u64)> = inner
            .by_order
            .range(..)
            .take_while(|((enqueued_at, _), _)| now.duration_since(*enqueued_at) > timeout)
            .map(|(k, _)| *k)
            .collect();

        let mut timed_out = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(entry) = inner.by_order.remove(&key) {
                inner.by_hash.remove(&entry.request.hash);
                timed_out.push(entry.request);
            }
        }
        timed_out
    }

    /// Current number of in-flight entries.
    #[must_use]
    pub fn count(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.by_hash.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn req(hash: &str) -> Request {
        Request::new(hash, format!("https://example.com/{hash}"))
    }

    #[test]
    fn enqueue_rejects_duplicate_hash() {
        let table = RequestedQueue::new();
        assert!(table.enqueue(req("h1")));
        assert!(!table.enqueue(req("h1")));
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn dequeue_missing_hash_returns_none() {
        let table = RequestedQueue::new();
        assert!(table.dequeue("absent").is_none());
    }

    #[test]
    fn dequeue_removes_entry_and_decrements_count() {
        let table = RequestedQueue::new();
        table.enqueue(req("h1"));
        let removed = table.dequeue("h1").expect("entry present");
        assert_eq!(removed.hash, "h1");
        assert_eq!(table.count(), 0);
        assert!(table.dequeue("h1").is_none());
    }

    #[test]
    fn sweep_timeouts_returns_only_expired_entries_in_insertion_order() {
        let table = RequestedQueue::new();
        table.enqueue(req("old"));
        sleep(Duration::from_millis(30));
        table.enqueue(req("new"));

        let timed_out = table.sweep_timeouts(Duration::from_millis(15));
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].hash, "old");
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn at_most_one_entry_per_hash_invariant_holds_under_reinsert() {
        let table = RequestedQueue::new();
        assert!(table.enqueue(req("h1")));
        let taken = table.dequeue("h1").unwrap();
        assert!(table.enqueue(taken));
        assert_eq!(table.count(), 1);
    }
}
