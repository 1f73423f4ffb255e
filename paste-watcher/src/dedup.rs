use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// In-memory record of recently seen paste keys and when they were last seen.
///
/// The cache starts empty on every process start and is never persisted. One lock covers
/// marking, lookups and eviction sweeps, so it can be shared freely between tasks.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key` as seen at `now`, refreshing the timestamp if it was already present.
    pub fn mark(&self, key: impl Into<String>, now: DateTime<Utc>) {
        self.entries.lock().insert(key.into(), now);
    }

    /// Whether `key` is present. Does not refresh it.
    pub fn seen(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// When `key` was last marked, if present.
    pub fn last_seen(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().get(key).copied()
    }

    /// Remove every entry older than `max_age` at `now`. An entry exactly `max_age` old is
    /// kept. Returns the number of entries removed.
    pub fn evict(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        // Longer than chrono can represent: nothing can be that old.
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, last_seen| now.signed_duration_since(*last_seen) <= max_age);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_eviction_respects_max_age() {
        let cache = DedupCache::new();
        let max_age = Duration::from_secs(10);
        cache.mark("abc", t0());

        assert_eq!(cache.evict(t0() + chrono::Duration::seconds(5), max_age), 0);
        assert!(cache.seen("abc"));

        assert_eq!(cache.evict(t0() + chrono::Duration::seconds(10), max_age), 0);
        assert!(cache.seen("abc"));

        assert_eq!(cache.evict(t0() + chrono::Duration::seconds(11), max_age), 1);
        assert!(!cache.seen("abc"));
    }

    #[test]
    fn test_hour_long_retention() {
        let cache = DedupCache::new();
        let max_age = Duration::from_secs(3600);
        cache.mark("abc", t0());

        assert!(cache.seen("abc"));
        cache.evict(t0() + chrono::Duration::minutes(30), max_age);
        assert!(cache.seen("abc"));

        cache.evict(t0() + chrono::Duration::hours(2), max_age);
        assert!(!cache.seen("abc"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remark_refreshes_timestamp() {
        let cache = DedupCache::new();
        let max_age = Duration::from_secs(10);
        cache.mark("abc", t0());
        cache.mark("abc", t0() + chrono::Duration::seconds(8));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.last_seen("abc"),
            Some(t0() + chrono::Duration::seconds(8))
        );

        assert_eq!(cache.evict(t0() + chrono::Duration::seconds(15), max_age), 0);
        assert!(cache.seen("abc"));
    }

    #[test]
    fn test_seen_does_not_refresh() {
        let cache = DedupCache::new();
        cache.mark("abc", t0());
        assert!(cache.seen("abc"));
        assert_eq!(cache.last_seen("abc"), Some(t0()));
        assert!(!cache.seen("other"));
    }

    #[test]
    fn test_evict_only_removes_stale_entries() {
        let cache = DedupCache::new();
        cache.mark("old", t0());
        cache.mark("new", t0() + chrono::Duration::seconds(50));

        let removed = cache.evict(t0() + chrono::Duration::seconds(60), Duration::from_secs(30));
        assert_eq!(removed, 1);
        assert!(!cache.seen("old"));
        assert!(cache.seen("new"));
    }

    #[test]
    fn test_huge_max_age_keeps_everything() {
        let cache = DedupCache::new();
        cache.mark("abc", t0());
        assert_eq!(cache.evict(t0(), Duration::MAX), 0);
        assert!(cache.seen("abc"));
    }

    #[test]
    fn test_concurrent_marks() {
        let cache = Arc::new(DedupCache::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.mark(format!("{worker}-{i}"), t0());
                        cache.evict(t0(), Duration::from_secs(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 400);
    }
}
