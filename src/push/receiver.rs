//! Client-side push intake.
//!
//! # Responsibilities
//! - Keep one push session dialed, redialing after a constant delay
//! - Turn every accepted stream into a [`PushedResponse`] whose body is
//!   read lazily from the stream
//! - Feed the response cache and purge it periodically
//!
//! # Data Flow
//! ```text
//! dialer → session → accept loop ─spawn─▶ stream task
//!                                          read_header → decode head
//!                                          → strip chunked → DrainSignal
//!                                          → queue ─▶ ingest → ResponseCache
//!                                          ◀─ drain outcome (logged)
//! ```
//!
//! # Design Decisions
//! - A stream task stays alive until the body was drained or abandoned,
//!   so the stream outlives the hand-off to the cache
//! - A body that ends short of its declared length fails its readers with
//!   `UnexpectedEof` instead of looking complete

use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_LENGTH;
use tokio::sync::mpsc;

use crate::cache::{CacheKey, PushedResponse, ResponseCache};
use crate::config::PushConfig;
use crate::http::body::{Body, DrainOutcome, DrainSignal};
use crate::http::head::ResponseHead;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::push::mux::{BoxedStream, MuxSession, SessionDialer};
use crate::push::protocol::{self, ProtocolError};
use crate::resilience::reconnect_delay;

/// Decode the header record of a push stream and wrap the rest of the
/// stream as the response body.
///
/// The returned receiver reports how the body was consumed.
pub async fn decode_push(
    mut stream: BoxedStream,
    max_record_bytes: usize,
) -> Result<(PushedResponse, tokio::sync::oneshot::Receiver<DrainOutcome>), ProtocolError> {
    let header = protocol::read_header(&mut stream, max_record_bytes).await?;
    let mut head = ResponseHead::decode(&header.response_head)?;

    // The body on the stream is raw bytes; a chunked coding no longer applies.
    if head.strip_chunked() {
        head.headers.remove(CONTENT_LENGTH);
    }
    let expected = head.content_length();

    let (body, drained) = DrainSignal::new(stream, expected);
    let pushed = PushedResponse {
        key: CacheKey::new(&header.url),
        response: head.into_response(Body::from_reader(body)),
    };
    Ok((pushed, drained))
}

/// Handle one accepted stream end to end.
pub async fn serve_stream(
    stream: BoxedStream,
    queue: mpsc::Sender<PushedResponse>,
    max_record_bytes: usize,
) -> Result<DrainOutcome, ProtocolError> {
    let (pushed, drained) = match decode_push(stream, max_record_bytes).await {
        Ok(decoded) => decoded,
        Err(e) => {
            metrics::record_push_received("malformed");
            return Err(e);
        }
    };
    let key = pushed.key.clone();
    tracing::debug!(url = %key, status = %pushed.response.status(), "Push received");

    if queue.send(pushed).await.is_err() {
        metrics::record_push_received("dropped");
        return Ok(DrainOutcome::Failed(std::io::ErrorKind::BrokenPipe));
    }

    // The sender half is dropped unfired when every fork was discarded
    // before reaching the end, e.g. the entry expired unread.
    let outcome = drained
        .await
        .unwrap_or(DrainOutcome::Failed(std::io::ErrorKind::Interrupted));
    match &outcome {
        DrainOutcome::Complete { bytes } => {
            metrics::record_push_received("complete");
            tracing::debug!(url = %key, bytes, "Push body drained");
        }
        DrainOutcome::Truncated { expected, received } => {
            metrics::record_push_received("truncated");
            tracing::warn!(url = %key, expected, received, "Push body truncated");
        }
        DrainOutcome::Failed(kind) => {
            metrics::record_push_received("failed");
            tracing::debug!(url = %key, error = ?kind, "Push body not drained");
        }
    }
    Ok(outcome)
}

enum SessionEnd {
    Shutdown,
    Closed(Option<std::io::Error>),
}

/// Keeps a push session to the server side alive and forwards its pushes.
pub struct PushReceiver {
    dialer: Arc<dyn SessionDialer>,
    queue: mpsc::Sender<PushedResponse>,
    reconnect_delay_ms: u64,
    max_record_bytes: usize,
}

impl PushReceiver {
    pub fn new(
        dialer: Arc<dyn SessionDialer>,
        queue: mpsc::Sender<PushedResponse>,
        config: &PushConfig,
    ) -> Self {
        Self {
            dialer,
            queue,
            reconnect_delay_ms: config.reconnect_delay_ms,
            max_record_bytes: config.max_record_bytes,
        }
    }

    /// Dial, serve, and redial until shutdown.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut attempt: u32 = 0;
        loop {
            let dialed = tokio::select! {
                _ = shutdown.recv() => return,
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(session) => {
                    attempt = 0;
                    tracing::info!("Push session established");
                    match self.serve_session(&session, &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            session.close();
                            tracing::info!("Push receiver stopped");
                            return;
                        }
                        SessionEnd::Closed(None) => tracing::warn!("Push session closed"),
                        SessionEnd::Closed(Some(e)) => {
                            tracing::warn!(error = %e, "Push session failed")
                        }
                    }
                    session.close();
                }
                Err(e) => tracing::warn!(error = %e, attempt, "Failed to dial push session"),
            }

            attempt = attempt.saturating_add(1);
            let delay = reconnect_delay(attempt, self.reconnect_delay_ms);
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Redialing push session");
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn serve_session(
        &self,
        session: &Arc<dyn MuxSession>,
        shutdown: &mut ShutdownSignal,
    ) -> SessionEnd {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => return SessionEnd::Shutdown,
                accepted = session.accept() => accepted,
            };
            match accepted {
                Ok(Some(stream)) => {
                    let queue = self.queue.clone();
                    let max_record_bytes = self.max_record_bytes;
                    tokio::spawn(async move {
                        if let Err(e) = serve_stream(stream, queue, max_record_bytes).await {
                            tracing::warn!(error = %e, "Rejected push stream");
                        }
                    });
                }
                Ok(None) => return SessionEnd::Closed(None),
                Err(e) => return SessionEnd::Closed(Some(e)),
            }
        }
    }
}

/// Move received pushes into the cache and purge it every `purge_interval`.
pub async fn run_ingest(
    cache: Arc<ResponseCache>,
    mut queue: mpsc::Receiver<PushedResponse>,
    purge_interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut purge = tokio::time::interval(purge_interval);
    purge.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            pushed = queue.recv() => match pushed {
                Some(pushed) => cache.add(pushed),
                None => break,
            },
            _ = purge.tick() => {
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired pushes");
                }
            }
        }
    }
    tracing::debug!("Push ingest stopped");
}
