//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! Client side:
//!     push receiver → PushedResponse
//!     → response_cache.rs (store, fork body, wake listeners)
//!     → racing client (get / get_or_create_listener)
//!
//! Server side:
//!     observed document URL → ttl.rs (throttle window)
//! ```
//!
//! # Design Decisions
//! - Keys are canonical URLs (key.rs); only GET is ever cached
//! - Eviction is TTL only

pub mod key;
pub mod listener;
pub mod response_cache;
pub mod ttl;

pub use key::CacheKey;
pub use listener::Listener;
pub use response_cache::{Lookup, PushedResponse, ResponseCache, PREFETCH_MARKER};
pub use ttl::TtlCache;
