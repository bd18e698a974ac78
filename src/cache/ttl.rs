//! A small TTL map.

use std::hash::Hash;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

struct Slot<V> {
    value: V,
    expire_at: Instant,
}

/// Concurrent map whose entries disappear `ttl` after they were written.
///
/// Expired entries are invisible immediately and physically removed by
/// [`TtlCache::purge_expired`] or when their key is written again.
pub struct TtlCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expire_at = Instant::now() + self.ttl;
        self.entries.insert(key, Slot { value, expire_at });
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| now < slot.expire_at)
            .map(|slot| slot.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert `value` unless a live entry exists. Returns whether it inserted.
    ///
    /// The check and the write hold the key's shard lock, so of many
    /// concurrent callers with the same key exactly one wins.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let now = Instant::now();
        let slot = Slot {
            value,
            expire_at: now + self.ttl,
        };
        match self.entries.entry(key) {
            Entry::Occupied(live) if now < live.get().expire_at => false,
            Entry::Occupied(mut expired) => {
                expired.insert(slot);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                true
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| now < slot.expire_at);
        before.saturating_sub(self.entries.len())
    }

    /// Entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = TtlCache::new(Duration::from_secs(5));
        cache.insert("doc", ());
        assert!(cache.contains(&"doc"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!cache.contains(&"doc"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn insert_if_absent_respects_live_entries() {
        let cache = TtlCache::new(Duration::from_secs(5));
        assert!(cache.insert_if_absent("doc", 1));
        assert!(!cache.insert_if_absent("doc", 2));
        assert_eq!(cache.get(&"doc"), Some(1));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.insert_if_absent("doc", 3));
        assert_eq!(cache.get(&"doc"), Some(3));
    }

    #[test]
    fn concurrent_insert_if_absent_has_one_winner() {
        let cache = TtlCache::new(Duration::from_secs(60));
        let winners = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if cache.insert_if_absent("doc", ()) {
                        winners.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(winners.into_inner(), 1);
        assert_eq!(cache.len(), 1);
    }
}
