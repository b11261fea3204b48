//! Access recency ordering.
//!
//! Each path carries its own access stamp inside the ordered set, so the
//! ordering never depends on state outside the set. Stamps are unix
//! nanoseconds forced strictly increasing, which makes `(stamp, path)`
//! unique and the order total even when the clock stalls or steps back.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

/// Entries fetched per lock acquisition while iterating.
const ITER_BATCH: usize = 256;

#[derive(Default)]
struct Inner {
    ordered: BTreeSet<(i128, String)>,
    stamps: HashMap<String, i128>,
    last_stamp: i128,
}

impl Inner {
    fn next_stamp(&mut self, now: i128) -> i128 {
        let stamp = now.max(self.last_stamp + 1);
        self.last_stamp = stamp;
        stamp
    }

    fn remove(&mut self, path: &str) -> bool {
        match self.stamps.remove(path) {
            Some(stamp) => {
                self.ordered.remove(&(stamp, path.to_string()));
                true
            }
            None => false,
        }
    }
}

/// One path and the time it was last accessed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessEntry {
    pub path: String,
    stamp: i128,
}

impl AccessEntry {
    pub fn accessed_at(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp_nanos(self.stamp)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }

    pub fn unix_seconds(&self) -> i64 {
        (self.stamp / 1_000_000_000) as i64
    }
}

/// Set of paths ordered by last access, oldest first.
#[derive(Default)]
pub struct AccessRecencyTracker {
    inner: RwLock<Inner>,
}

impl AccessRecencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| {
            tracing::warn!("access recency RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| {
            tracing::warn!("access recency RwLock was poisoned, recovering with into_inner()");
            poisoned.into_inner()
        })
    }

    /// Record an access now, replacing any earlier position for `path`.
    pub fn touch(&self, path: &str) {
        let now = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let mut inner = self.write();
        inner.remove(path);
        let stamp = inner.next_stamp(now);
        inner.ordered.insert((stamp, path.to_string()));
        inner.stamps.insert(path.to_string(), stamp);
    }

    /// Forget `path`. Returns whether it was tracked.
    pub fn remove(&self, path: &str) -> bool {
        self.write().remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.read().stamps.contains_key(path)
    }

    pub fn last_access(&self, path: &str) -> Option<OffsetDateTime> {
        let stamp = *self.read().stamps.get(path)?;
        OffsetDateTime::from_unix_timestamp_nanos(stamp).ok()
    }

    pub fn len(&self) -> usize {
        self.read().stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate oldest-accessed first.
    ///
    /// The iterator reads in small batches, releasing the lock between
    /// them, so writers are never blocked for the length of a listing.
    /// Only entries stamped before the call are visited, which keeps the
    /// walk finite under constant traffic. Call again to restart.
    pub fn iter(&self) -> RecencyIter<'_> {
        let high_water = self.read().last_stamp;
        RecencyIter {
            tracker: self,
            cursor: None,
            high_water,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

/// Lazy oldest-first walk over an [`AccessRecencyTracker`].
pub struct RecencyIter<'a> {
    tracker: &'a AccessRecencyTracker,
    cursor: Option<(i128, String)>,
    high_water: i128,
    buffer: VecDeque<AccessEntry>,
    exhausted: bool,
}

impl RecencyIter<'_> {
    fn refill(&mut self) {
        let inner = self.tracker.read();
        let lower = match &self.cursor {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };

        let mut fetched = 0;
        for (stamp, path) in inner.ordered.range((lower, Bound::Unbounded)) {
            if *stamp > self.high_water {
                self.exhausted = true;
                break;
            }
            self.buffer.push_back(AccessEntry {
                path: path.clone(),
                stamp: *stamp,
            });
            fetched += 1;
            if fetched == ITER_BATCH {
                break;
            }
        }

        if fetched < ITER_BATCH {
            self.exhausted = true;
        }
        if let Some(last) = self.buffer.back() {
            self.cursor = Some((last.stamp, last.path.clone()));
        }
    }
}

impl Iterator for RecencyIter<'_> {
    type Item = AccessEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn paths(tracker: &AccessRecencyTracker) -> Vec<String> {
        tracker.iter().map(|e| e.path).collect()
    }

    #[test]
    fn orders_oldest_first() {
        let tracker = AccessRecencyTracker::new();
        tracker.touch("/a");
        tracker.touch("/b");
        tracker.touch("/c");
        assert_eq!(paths(&tracker), vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn retouch_moves_path_to_the_end_once() {
        let tracker = AccessRecencyTracker::new();
        tracker.touch("/p");
        tracker.touch("/q");
        tracker.touch("/r");
        tracker.touch("/p");
        tracker.touch("/p");

        let order = paths(&tracker);
        assert_eq!(order, vec!["/q", "/r", "/p"]);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn stamps_are_strictly_increasing() {
        let tracker = AccessRecencyTracker::new();
        for i in 0..1000 {
            tracker.touch(&format!("/{i}"));
        }
        let entries: Vec<AccessEntry> = tracker.iter().collect();
        assert_eq!(entries.len(), 1000);
        for pair in entries.windows(2) {
            assert!(pair[0].stamp < pair[1].stamp);
        }
        assert_eq!(entries[0].path, "/0");
        assert_eq!(entries[999].path, "/999");
    }

    #[test]
    fn remove_is_idempotent() {
        let tracker = AccessRecencyTracker::new();
        tracker.touch("/a");
        assert!(tracker.remove("/a"));
        assert!(!tracker.remove("/a"));
        assert!(!tracker.remove("/never"));
        assert!(tracker.is_empty());
        assert!(paths(&tracker).is_empty());
    }

    #[test]
    fn iteration_spans_multiple_batches_and_restarts() {
        let tracker = AccessRecencyTracker::new();
        let total = ITER_BATCH * 2 + 17;
        for i in 0..total {
            tracker.touch(&format!("/{i:05}"));
        }

        let first: Vec<String> = paths(&tracker);
        assert_eq!(first.len(), total);
        let second: Vec<String> = paths(&tracker);
        assert_eq!(first, second);
    }

    #[test]
    fn iteration_ignores_touches_made_after_it_started() {
        let tracker = AccessRecencyTracker::new();
        for i in 0..ITER_BATCH + 5 {
            tracker.touch(&format!("/{i}"));
        }

        let mut iter = tracker.iter();
        let first = iter.next().unwrap();
        assert_eq!(first.path, "/0");
        tracker.touch("/late");

        let rest: Vec<String> = iter.map(|e| e.path).collect();
        assert_eq!(rest.len(), ITER_BATCH + 4);
        assert!(!rest.contains(&"/late".to_string()));
    }

    #[test]
    fn concurrent_readers_never_see_duplicates() {
        let tracker = Arc::new(AccessRecencyTracker::new());
        for i in 0..100 {
            tracker.touch(&format!("/{i}"));
        }

        let writer = {
            let tracker = Arc::clone(&tracker);
            std::thread::spawn(move || {
                for round in 0..50 {
                    for i in 0..100 {
                        if (i + round) % 3 == 0 {
                            tracker.touch(&format!("/{i}"));
                        }
                    }
                }
            })
        };

        for _ in 0..20 {
            let entries: Vec<AccessEntry> = tracker.iter().collect();
            let mut seen = std::collections::HashSet::new();
            // a path moved forward mid-walk can be skipped, never repeated,
            // because its new stamp is above the high water mark
            for entry in &entries {
                assert!(seen.insert(entry.path.clone()));
            }
        }

        writer.join().unwrap();
        assert_eq!(tracker.len(), 100);
    }

    #[test]
    fn exposes_access_time() {
        let tracker = AccessRecencyTracker::new();
        let before = OffsetDateTime::now_utc();
        tracker.touch("/a");
        let at = tracker.last_access("/a").unwrap();
        assert!(at >= before - time::Duration::seconds(1));
        let entry = tracker.iter().next().unwrap();
        assert_eq!(entry.accessed_at(), at);
        assert_eq!(entry.unix_seconds(), at.unix_timestamp());
    }
}
