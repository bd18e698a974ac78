//! Speculative prefetching.
//!
//! # Data Flow
//! ```text
//! Server side:
//!     document response → orchestrator.rs
//!         → extract.rs (references in <head>) → request.rs (resolve, build GET)
//!         → flying.rs (one fetch per URL) → transport → push channel
//!     client request → relay.rs (in-flight status or origin, then observe)
//!
//! Client side:
//!     request → client.rs (filter) → racing.rs (push vs direct) → response
//! ```
//!
//! # Design Decisions
//! - Speculative work never blocks or fails the real request path
//! - The transient in-flight status (599) travels from server side to
//!   client side only; the end user never sees it

pub mod client;
pub mod extract;
pub mod flying;
pub mod orchestrator;
pub mod racing;
pub mod relay;
pub mod request;

pub use client::{ClientError, PrefetchClient};
pub use extract::{ExtractError, HeadScanner, ResourceExtractor};
pub use flying::{FlyingGuard, FlyingSet};
pub use orchestrator::{DiscoveryReport, DispatchOutcome, Observation, PrefetchOrchestrator, ResourceReport};
pub use racing::{RaceError, RacingHttpClient};
pub use relay::RelayTransport;
pub use request::PREFETCH_IN_FLIGHT;
