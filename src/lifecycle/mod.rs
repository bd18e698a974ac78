//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build server side → Build client side
//!     → Connect push channel → Spawn receiver and ingest tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop receiver → Stop ingest → Close push session
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, server side before the client dials it
//! - Shutdown is a latched broadcast; late subscribers still see it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{ClientSide, Pipeline, ServedResource, ServerSide, WarmError, WarmReport};
