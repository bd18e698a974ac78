//! Resilience helpers.
//!
//! # Design Decisions
//! - The push receiver never gives up: a lost session is redialed after a
//!   constant, jittered delay (backoff.rs)
//! - Everything else fails fast and is logged; a speculative fetch that
//!   fails costs nothing but the missed prefetch

pub mod backoff;

pub use backoff::{calculate_backoff, reconnect_delay};
