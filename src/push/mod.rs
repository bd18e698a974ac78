//! Push channel between the server-side and client-side proxies.
//!
//! # Data Flow
//! ```text
//! Server side:
//!     orchestrator → channel.rs (current session)
//!     → sender.rs (open stream, header record, raw body, close write side)
//!
//! Client side:
//!     receiver.rs (dial, accept) → protocol.rs (header record)
//!     → PushedResponse → ResponseCache
//! ```
//!
//! # Design Decisions
//! - One stream per pushed response over one multiplexed session (mux.rs)
//! - The body travels raw: chunked framing is removed by the sender's
//!   transport and the receiver drops the chunked coding from the head
//! - At most one session exists; a new one replaces and closes the old

pub mod channel;
pub mod mux;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use channel::PushChannel;
pub use mux::{memory_pair, BoxedStream, MemoryDialer, MemorySession, MuxSession, SessionDialer};
pub use protocol::{ProtocolError, PushHeader};
pub use receiver::{run_ingest, PushReceiver};
pub use sender::{PushError, PushSender};
