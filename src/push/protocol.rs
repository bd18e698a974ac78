//! Push stream framing.
//!
//! Every push stream starts with one header record, then carries the raw
//! response body until the sender closes its write side:
//!
//! ```text
//! +----------------+---------------------------------------+---------- - -
//! | u32 BE length  | bincode PushHeader { url, head }      | body bytes
//! +----------------+---------------------------------------+---------- - -
//! ```
//!
//! The decoder consumes exactly `4 + length` bytes, so whatever follows the
//! record is left in the stream for the body reader.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Metadata sent ahead of a pushed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushHeader {
    /// Canonical URL the response answers.
    pub url: String,
    /// HTTP/1 status line and header block.
    pub response_head: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode header record: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode header record: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("header record of {len} bytes exceeds limit of {max}")]
    TooLarge { len: usize, max: usize },

    #[error("header record declared {declared} bytes but decoded {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("invalid response head: {0}")]
    Head(#[from] crate::http::head::HeadError),
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Write the length-prefixed header record.
pub async fn write_header<W>(writer: &mut W, header: &PushHeader) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = bincode::serde::encode_to_vec(header, bincode_config())?;
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32(len).await?;
    writer.write_all(&payload).await?;
    Ok(())
}

/// Read one header record, consuming nothing past it.
pub async fn read_header<R>(reader: &mut R, max_len: usize) -> Result<PushHeader, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = reader.read_u32().await? as usize;
    if len > max_len {
        return Err(ProtocolError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let (header, consumed): (PushHeader, usize) =
        bincode::serde::decode_from_slice(&payload, bincode_config())?;
    if consumed != len {
        return Err(ProtocolError::LengthMismatch {
            declared: len,
            consumed,
        });
    }
    Ok(header)
}
