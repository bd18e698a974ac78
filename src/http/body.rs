//! Response bodies.
//!
//! # Responsibilities
//! - `Body`: an owned, streaming byte source used by every response in the crate
//! - `RepeatableBody`: a body that can be forked into independent replays
//! - `DrainSignal`: a body wrapper that reports, exactly once, how reading ended
//!
//! # Design Decisions
//! - Bodies are `AsyncRead` streams; stream close is EOF
//! - A fork never disturbs another fork: the source is read once into a
//!   shared arena and every fork keeps its own cursor into it
//! - Whichever fork is furthest ahead pulls from the network; the others
//!   replay from memory

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::oneshot;

const PULL_CHUNK: usize = 8 * 1024;

/// An owned streaming response body.
pub struct Body {
    inner: Pin<Box<dyn AsyncRead + Send + 'static>>,
}

impl Body {
    /// A body with no bytes.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A body backed by an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_reader(io::Cursor::new(bytes.into()))
    }

    /// A body streaming from any reader; reader EOF is body EOF.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: Box::pin(reader),
        }
    }

    /// Read the whole body into memory.
    pub async fn collect(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read at most `limit` bytes.
    ///
    /// Returns the bytes read and whether the body had more to give.
    pub async fn collect_prefix(self, limit: usize) -> io::Result<(Bytes, Option<Body>)> {
        let mut buf = Vec::with_capacity(limit.min(64 * 1024));
        let mut limited = self.take(limit as u64 + 1);
        limited.read_to_end(&mut buf).await?;
        let rest = limited.into_inner();
        if buf.len() > limit {
            // The extra byte proves there is more; hand it back in front of the rest.
            let overflow = buf.split_off(limit);
            let rest = Body::from_reader(io::Cursor::new(overflow).chain(rest));
            Ok((Bytes::from(buf), Some(rest)))
        } else {
            Ok((Bytes::from(buf), None))
        }
    }
}

impl AsyncRead for Body {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(v)
    }
}

struct Arena {
    buf: Vec<u8>,
    source: Option<Body>,
    done: bool,
    error: Option<(io::ErrorKind, String)>,
    wakers: Vec<Waker>,
}

impl Arena {
    fn park(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

/// A body that can be replayed any number of times.
///
/// Cloning shares the arena; use [`RepeatableBody::fork`] to obtain a reader.
#[derive(Clone)]
pub struct RepeatableBody {
    arena: Arc<Mutex<Arena>>,
}

impl RepeatableBody {
    /// Wrap a streaming body. Nothing is read until the first fork is polled.
    pub fn new(source: Body) -> Self {
        Self {
            arena: Arc::new(Mutex::new(Arena {
                buf: Vec::new(),
                source: Some(source),
                done: false,
                error: None,
                wakers: Vec::new(),
            })),
        }
    }

    /// A new independent reader starting at byte 0.
    pub fn fork(&self) -> Body {
        Body::from_reader(Fork {
            arena: Arc::clone(&self.arena),
            pos: 0,
        })
    }

    /// Bytes pulled from the source so far.
    pub fn buffered_len(&self) -> usize {
        lock(&self.arena).buf.len()
    }

    /// Whether the source has been read to the end.
    pub fn is_complete(&self) -> bool {
        lock(&self.arena).done
    }
}

impl fmt::Debug for RepeatableBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = lock(&self.arena);
        f.debug_struct("RepeatableBody")
            .field("buffered", &arena.buf.len())
            .field("done", &arena.done)
            .finish()
    }
}

fn lock(arena: &Mutex<Arena>) -> MutexGuard<'_, Arena> {
    arena.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Fork {
    arena: Arc<Mutex<Arena>>,
    pos: usize,
}

impl AsyncRead for Fork {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut arena = lock(&this.arena);

        loop {
            if this.pos < arena.buf.len() {
                let n = out.remaining().min(arena.buf.len() - this.pos);
                out.put_slice(&arena.buf[this.pos..this.pos + n]);
                this.pos += n;
                return Poll::Ready(Ok(()));
            }
            if let Some((kind, message)) = &arena.error {
                return Poll::Ready(Err(io::Error::new(*kind, message.clone())));
            }
            if arena.done {
                return Poll::Ready(Ok(()));
            }

            let Some(source) = arena.source.as_mut() else {
                arena.done = true;
                continue;
            };
            let mut chunk = [0u8; PULL_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            match Pin::new(source).poll_read(cx, &mut chunk_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = chunk_buf.filled();
                    if filled.is_empty() {
                        arena.done = true;
                        arena.source = None;
                    } else {
                        arena.buf.extend_from_slice(filled);
                    }
                    arena.wake_all();
                }
                Poll::Ready(Err(e)) => {
                    arena.error = Some((e.kind(), e.to_string()));
                    arena.source = None;
                    arena.wake_all();
                }
                Poll::Pending => {
                    // The source only remembers the latest waker; park ours so
                    // progress made by any fork reaches every fork.
                    arena.park(cx.waker());
                    return Poll::Pending;
                }
            }
        }
    }
}

impl Drop for Fork {
    fn drop(&mut self) {
        // The source may hold this fork's waker; let a parked fork take over polling.
        lock(&self.arena).wake_all();
    }
}

/// How a signalled body finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The reader saw EOF after the expected number of bytes.
    Complete { bytes: u64 },
    /// The stream closed before the declared content length was reached.
    Truncated { expected: u64, received: u64 },
    /// Reading failed.
    Failed(io::ErrorKind),
}

/// Wraps a reader and reports how it ended through a oneshot, exactly once.
///
/// Dropping the wrapper before the end closes the channel without a value.
pub struct DrainSignal<R> {
    inner: R,
    received: u64,
    expected: Option<u64>,
    failed: Option<io::ErrorKind>,
    signal: Option<oneshot::Sender<DrainOutcome>>,
}

impl<R> DrainSignal<R> {
    pub fn new(inner: R, expected: Option<u64>) -> (Self, oneshot::Receiver<DrainOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner,
                received: 0,
                expected,
                failed: None,
                signal: Some(tx),
            },
            rx,
        )
    }

    fn fire(&mut self, outcome: DrainOutcome) {
        if let Some(tx) = self.signal.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DrainSignal<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.signal.is_none() && buf.remaining() > 0 {
            // Already finished; never touch the stream again.
            if let Some(kind) = this.failed {
                return Poll::Ready(Err(kind.into()));
            }
            return match this.expected {
                Some(expected) if this.received < expected => {
                    Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()))
                }
                _ => Poll::Ready(Ok(())),
            };
        }

        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = (buf.filled().len() - before) as u64;
                this.received += n;
                if n == 0 && buf.remaining() > 0 {
                    match this.expected {
                        Some(expected) if this.received < expected => {
                            let received = this.received;
                            this.fire(DrainOutcome::Truncated { expected, received });
                            return Poll::Ready(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("body closed after {} of {} bytes", received, expected),
                            )));
                        }
                        _ => {
                            let bytes = this.received;
                            this.fire(DrainOutcome::Complete { bytes });
                        }
                    }
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.failed = Some(e.kind());
                this.fire(DrainOutcome::Failed(e.kind()));
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
