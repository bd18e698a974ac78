//! Speculative fetches currently in flight.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::cache::CacheKey;
use crate::observability::metrics;

/// Keys being speculatively fetched. At most one fetch per key.
#[derive(Debug, Default)]
pub struct FlyingSet {
    keys: DashMap<CacheKey, ()>,
}

impl FlyingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. `None` if a fetch for it is already in flight.
    pub fn try_claim(self: &Arc<Self>, key: &CacheKey) -> Option<FlyingGuard> {
        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        metrics::set_flying(self.keys.len());
        Some(FlyingGuard {
            set: Arc::clone(self),
            key: key.clone(),
        })
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Releases its key when dropped, however the fetch ended.
#[derive(Debug)]
pub struct FlyingGuard {
    set: Arc<FlyingSet>,
    key: CacheKey,
}

impl FlyingGuard {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for FlyingGuard {
    fn drop(&mut self) {
        self.set.keys.remove(&self.key);
        metrics::set_flying(self.set.keys.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_claim_per_key() {
        let set = Arc::new(FlyingSet::new());
        let key = CacheKey::new("http://example.com/app.js");

        let guard = set.try_claim(&key).expect("first claim");
        assert!(set.try_claim(&key).is_none());
        assert!(set.contains(&key));
        assert_eq!(guard.key(), &key);

        drop(guard);
        assert!(set.is_empty());
        assert!(set.try_claim(&key).is_some());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let set = Arc::new(FlyingSet::new());
        let key = CacheKey::new("http://example.com/app.js");
        let winners: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| set.try_claim(&key)))
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(winners.len(), 1);
    }
}
