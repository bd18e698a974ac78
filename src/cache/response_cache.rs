//! Client-side store of pushed responses.
//!
//! # Responsibilities
//! - Hold arrived-but-unconsumed pushes for a bounded time
//! - Hand every consumer an independent replay of the body
//! - Wake racers that registered for a key before its push arrived
//!
//! # Design Decisions
//! - One mutex guards both the entries and the listener table, so a
//!   lookup followed by a registration cannot miss a push landing in between
//! - Wake-ups are `try_send` into a one-slot channel: never blocks the
//!   inserting task, redundant wake-ups are dropped
//! - Expired entries are removed lazily on lookup and by periodic purges

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::Response;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::listener::Listener;
use crate::cache::CacheKey;
use crate::http::body::{Body, RepeatableBody};
use crate::http::head::ResponseHead;
use crate::observability::metrics;

/// Header added to every response that reached the client through a push.
pub const PREFETCH_MARKER: HeaderName = HeaderName::from_static("x-prefetch");

/// A response delivered by the push channel, keyed by the URL it answers.
#[derive(Debug)]
pub struct PushedResponse {
    pub key: CacheKey,
    pub response: Response<Body>,
}

/// Result of [`ResponseCache::get_or_create_listener`].
#[derive(Debug)]
pub enum Lookup {
    /// A live push was cached; here is a fork of it.
    Hit(Response<Body>),
    /// Nothing cached yet; the listener fires when it arrives.
    Miss(Listener),
}

struct Entry {
    head: ResponseHead,
    body: RepeatableBody,
    expire_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    listeners: HashMap<CacheKey, HashMap<u64, mpsc::Sender<()>>>,
}

impl State {
    fn live(&mut self, key: &CacheKey, now: Instant) -> Option<Response<Body>> {
        let entry = self.entries.get(key)?;
        if now < entry.expire_at {
            return Some(entry.head.clone().into_response(entry.body.fork()));
        }
        self.entries.remove(key);
        None
    }
}

/// TTL-bounded cache of pushed responses with per-key listeners.
pub struct ResponseCache {
    state: Mutex<State>,
    next_listener_id: AtomicU64,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_listener_id: AtomicU64::new(1),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a push, replacing any previous one for the same key, and wake
    /// every listener waiting on that key.
    pub fn add(&self, pushed: PushedResponse) {
        let PushedResponse { key, response } = pushed;
        let (mut parts, body) = response.into_parts();
        parts
            .headers
            .insert(PREFETCH_MARKER, HeaderValue::from_static("true"));
        let head = ResponseHead {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
        };
        let entry = Entry {
            head,
            body: RepeatableBody::new(body),
            expire_at: Instant::now() + self.ttl,
        };

        let mut state = self.lock();
        state.entries.insert(key.clone(), entry);
        if let Some(listeners) = state.listeners.get(&key) {
            for signal in listeners.values() {
                let _ = signal.try_send(());
            }
            tracing::debug!(url = %key, listeners = listeners.len(), "Woke push listeners");
        }
        metrics::set_cache_entries(state.entries.len());
    }

    /// A replay of the cached push for `key`, if one is live.
    pub fn get(&self, key: &CacheKey) -> Option<Response<Body>> {
        self.lock().live(key, Instant::now())
    }

    /// Atomically look `key` up, registering a listener on a miss.
    pub fn get_or_create_listener(self: &Arc<Self>, key: &CacheKey) -> Lookup {
        let mut state = self.lock();
        if let Some(response) = state.live(key, Instant::now()) {
            return Lookup::Hit(response);
        }

        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        state
            .listeners
            .entry(key.clone())
            .or_default()
            .insert(id, tx);
        drop(state);

        Lookup::Miss(Listener::new(id, key.clone(), rx, Arc::clone(self)))
    }

    /// Remove a listener's registration. Dropping the listener does the same.
    pub fn unregister_listener(&self, listener: &Listener) {
        self.unregister(listener.id(), listener.key());
    }

    pub(crate) fn unregister(&self, id: u64, key: &CacheKey) {
        let mut state = self.lock();
        if let Some(listeners) = state.listeners.get_mut(key) {
            listeners.remove(&id);
            if listeners.is_empty() {
                state.listeners.remove(key);
            }
        }
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| now < entry.expire_at);
        let purged = before - state.entries.len();
        metrics::set_cache_entries(state.entries.len());
        purged
    }

    /// Entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered listeners across all keys.
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.values().map(HashMap::len).sum()
    }

    /// Keys with at least one registered listener.
    pub fn listened_keys(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
