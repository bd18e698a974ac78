//! HTTP plumbing shared by both proxies.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → cache.rs (RFC 7234 lookup, server side only)
//!     → transport.rs (hyper client, timeouts, cancellation)
//!     → Response<Body>
//!         body.rs: streaming Body, forkable RepeatableBody, DrainSignal
//!         head.rs: status line + headers ⇄ HTTP/1 byte blob
//! ```

pub mod body;
pub mod cache;
pub mod head;
pub mod transport;

pub use body::{Body, DrainOutcome, DrainSignal, RepeatableBody};
pub use cache::{CachingTransport, HttpCache};
pub use head::ResponseHead;
pub use transport::{HttpTransport, HyperTransport, TransportError};
