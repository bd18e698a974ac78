//! Multiplexed transport seam.
//!
//! # Responsibilities
//! - Describe the transport the push channel runs over: one session,
//!   many independent ordered byte streams
//! - Provide an in-memory session pair for in-process wiring and tests
//!
//! # Design Decisions
//! - The server-side proxy opens streams, the client-side proxy accepts them
//! - Closing a session terminates its streams: pending reads and writes
//!   fail with `ConnectionAborted` instead of hanging
//! - A stream dropped before its write side was shut down is reset: the
//!   peer's reads fail with `ConnectionReset`, so an abandoned body never
//!   reads as a clean EOF

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// One logical stream of a session.
pub trait MuxStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> MuxStream for T {}

pub type BoxedStream = Box<dyn MuxStream>;

/// A multiplexed connection.
#[async_trait]
pub trait MuxSession: Send + Sync {
    /// Open a new outbound stream. Dropping it before `shutdown` completes
    /// resets it.
    async fn open(&self) -> io::Result<BoxedStream>;

    /// Wait for the peer to open a stream. `Ok(None)` once the session closed.
    async fn accept(&self) -> io::Result<Option<BoxedStream>>;

    /// Close the session and every stream on it.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Establishes client-side push sessions.
#[async_trait]
pub trait SessionDialer: Send + Sync {
    async fn dial(&self) -> io::Result<Arc<dyn MuxSession>>;
}

/// The accepting half of a stream and the reset token both halves share.
type Inbound = (DuplexStream, CancellationToken);

/// One end of an in-memory session.
pub struct MemorySession {
    outgoing: mpsc::Sender<Inbound>,
    incoming: Mutex<mpsc::Receiver<Inbound>>,
    closed: CancellationToken,
    stream_buffer: usize,
}

/// Two connected in-memory session ends.
///
/// Streams opened on one end are accepted on the other; closing either end
/// closes both.
pub fn memory_pair(stream_buffer: usize) -> (MemorySession, MemorySession) {
    let (a_tx, a_rx) = mpsc::channel(64);
    let (b_tx, b_rx) = mpsc::channel(64);
    let closed = CancellationToken::new();
    (
        MemorySession {
            outgoing: a_tx,
            incoming: Mutex::new(b_rx),
            closed: closed.clone(),
            stream_buffer,
        },
        MemorySession {
            outgoing: b_tx,
            incoming: Mutex::new(a_rx),
            closed,
            stream_buffer,
        },
    )
}

impl MemorySession {
    fn wrap(&self, stream: DuplexStream, reset: CancellationToken) -> BoxedStream {
        Box::new(SessionStream {
            inner: stream,
            closed: self.closed.clone(),
            closing: Box::pin(self.closed.clone().cancelled_owned()),
            resetting: Box::pin(reset.clone().cancelled_owned()),
            reset,
            finished: false,
        })
    }
}

#[async_trait]
impl MuxSession for MemorySession {
    async fn open(&self) -> io::Result<BoxedStream> {
        if self.closed.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"));
        }
        let (local, remote) = tokio::io::duplex(self.stream_buffer);
        let reset = CancellationToken::new();
        self.outgoing
            .send((remote, reset.clone()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "peer gone"))?;
        Ok(self.wrap(local, reset))
    }

    async fn accept(&self) -> io::Result<Option<BoxedStream>> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            inbound = incoming.recv() => Ok(inbound.map(|(s, reset)| self.wrap(s, reset))),
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// A duplex stream that fails once its session is closed or either end
/// reset it.
struct SessionStream {
    inner: DuplexStream,
    closed: CancellationToken,
    closing: Pin<Box<WaitForCancellationFutureOwned>>,
    reset: CancellationToken,
    resetting: Pin<Box<WaitForCancellationFutureOwned>>,
    /// Write side shut down cleanly.
    finished: bool,
}

impl SessionStream {
    fn poll_failed(&mut self, cx: &mut Context<'_>) -> Option<io::Error> {
        // Never poll a cancellation future after it completed.
        if self.closed.is_cancelled() || self.closing.as_mut().poll(cx).is_ready() {
            return Some(io::Error::new(io::ErrorKind::ConnectionAborted, "session closed"));
        }
        if self.reset.is_cancelled() || self.resetting.as_mut().poll(cx).is_ready() {
            return Some(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset"));
        }
        None
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        if !self.finished {
            self.reset.cancel();
        }
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_failed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_failed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(e) = this.poll_failed(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed.is_cancelled() {
            return Poll::Ready(Ok(()));
        }
        if this.reset.is_cancelled() {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")));
        }
        let result = Pin::new(&mut this.inner).poll_shutdown(cx);
        if let Poll::Ready(Ok(())) = result {
            this.finished = true;
        }
        result
    }
}

/// Dials by creating a fresh in-memory pair and handing the opening end to
/// the server side.
pub struct MemoryDialer<F> {
    on_connect: F,
    stream_buffer: usize,
}

impl<F> MemoryDialer<F>
where
    F: Fn(Arc<dyn MuxSession>) + Send + Sync,
{
    pub fn new(stream_buffer: usize, on_connect: F) -> Self {
        Self {
            on_connect,
            stream_buffer,
        }
    }
}

#[async_trait]
impl<F> SessionDialer for MemoryDialer<F>
where
    F: Fn(Arc<dyn MuxSession>) + Send + Sync,
{
    async fn dial(&self) -> io::Result<Arc<dyn MuxSession>> {
        let (client, server) = memory_pair(self.stream_buffer);
        (self.on_connect)(Arc::new(server));
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn opened_streams_are_accepted_by_peer() {
        let (server, client) = memory_pair(1024);
        let mut out = server.open().await.unwrap();
        out.write_all(b"ping").await.unwrap();
        out.shutdown().await.unwrap();

        let mut inbound = client.accept().await.unwrap().expect("stream");
        let mut buf = Vec::new();
        inbound.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"ping");
    }

    #[tokio::test]
    async fn close_ends_accept_and_aborts_streams() {
        let (server, client) = memory_pair(1024);
        let _out = server.open().await.unwrap();
        let mut inbound = client.accept().await.unwrap().expect("stream");

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            inbound.read(&mut buf).await
        });
        tokio::task::yield_now().await;
        server.close();

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(client.is_closed());
        assert!(client.accept().await.unwrap().is_none());
        assert!(server.open().await.is_err());
    }

    #[tokio::test]
    async fn dropping_an_unfinished_stream_resets_it() {
        let (server, client) = memory_pair(1024);
        let mut out = server.open().await.unwrap();
        out.write_all(b"partial").await.unwrap();
        drop(out);

        let mut inbound = client.accept().await.unwrap().expect("stream");
        let mut buf = Vec::new();
        let err = inbound.read_to_end(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn reader_dropping_resets_the_writer() {
        let (server, client) = memory_pair(16);
        let mut out = server.open().await.unwrap();
        let inbound = client.accept().await.unwrap().expect("stream");
        drop(inbound);

        let err = out.write_all(&[0u8; 64]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
