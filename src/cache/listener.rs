//! Waiters for pushes that have not arrived yet.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::response_cache::ResponseCache;
use crate::cache::CacheKey;

/// A registration for "wake me when `key` is pushed".
///
/// The signal channel holds one slot: a burst of pushes for the same key
/// wakes the listener once. Dropping the listener unregisters it.
pub struct Listener {
    id: u64,
    key: CacheKey,
    signal: mpsc::Receiver<()>,
    cache: Arc<ResponseCache>,
}

impl Listener {
    pub(crate) fn new(
        id: u64,
        key: CacheKey,
        signal: mpsc::Receiver<()>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            id,
            key,
            signal,
            cache,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for a push of this listener's key.
    ///
    /// Returns `false` if the listener was unregistered while waiting.
    pub async fn notified(&mut self) -> bool {
        self.signal.recv().await.is_some()
    }

    /// Unregister now. Dropping the listener has the same effect.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cache.unregister(self.id, &self.key);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}
