//! Server-side push delivery.

use std::sync::Arc;

use http::Response;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::cache::CacheKey;
use crate::http::body::Body;
use crate::http::head::ResponseHead;
use crate::push::mux::MuxSession;
use crate::push::protocol::{self, ProtocolError, PushHeader};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("no push session is connected")]
    NoSession,

    #[error("failed to open push stream: {0}")]
    Open(std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to copy response body: {0}")]
    Body(std::io::Error),

    #[error("content length mismatch: declared {expected}, sent {actual}")]
    ContentLengthMismatch { expected: u64, actual: u64 },
}

/// Pushes responses over one session, one stream per response.
pub struct PushSender {
    session: Arc<dyn MuxSession>,
}

impl PushSender {
    pub fn new(session: Arc<dyn MuxSession>) -> Self {
        Self { session }
    }

    /// Send `response` as the answer for `key`. Returns the body bytes sent.
    ///
    /// The stream is shut down only after a complete body. On any failure it
    /// is dropped unfinished, which resets it, so the receiver's body read
    /// fails instead of ending early.
    pub async fn push(&self, key: &CacheKey, response: Response<Body>) -> Result<u64, PushError> {
        let head = ResponseHead::of(&response);
        let expected = head.content_length();
        let header = PushHeader {
            url: key.to_string(),
            response_head: head.encode(),
        };

        let mut stream = self.session.open().await.map_err(PushError::Open)?;
        protocol::write_header(&mut stream, &header).await?;

        let mut body = response.into_body();
        let sent = tokio::io::copy(&mut body, &mut stream)
            .await
            .map_err(PushError::Body)?;
        if let Some(expected) = expected {
            if sent != expected {
                return Err(PushError::ContentLengthMismatch {
                    expected,
                    actual: sent,
                });
            }
        }

        stream.shutdown().await.map_err(PushError::Body)?;
        Ok(sent)
    }

    pub fn close(&self) {
        self.session.close();
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }
}
