//! Speculative prefetch engine for an HTTP MITM proxy pair.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod prefetch;
pub mod push;
pub mod resilience;

pub use cache::{CacheKey, ResponseCache};
pub use config::PrefetchProxyConfig;
pub use lifecycle::{Pipeline, Shutdown};
pub use prefetch::{PrefetchClient, PrefetchOrchestrator, RacingHttpClient};
pub use push::PushChannel;
