//! Response heads as HTTP/1 byte blobs.
//!
//! A pushed response travels as its status line and header block followed by
//! the raw body. This module turns a head into that blob and back.

use http::header::{HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{HeaderMap, Response, StatusCode, Version};
use thiserror::Error;

/// Upper bound on header lines in a replayed head.
pub const MAX_HEADERS: usize = 128;

/// Errors from parsing a head blob.
#[derive(Debug, Error)]
pub enum HeadError {
    #[error("malformed response head: {0}")]
    Parse(#[from] httparse::Error),

    #[error("response head is incomplete")]
    Incomplete,

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid header {0}")]
    InvalidHeader(String),
}

/// Status, version and headers of a response, without its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Copy the head of a response.
    pub fn of<B>(response: &Response<B>) -> Self {
        Self {
            status: response.status(),
            version: response.version(),
            headers: response.headers().clone(),
        }
    }

    /// Attach a body.
    pub fn into_response<B>(self, body: B) -> Response<B> {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        response
    }

    /// Serialize as an HTTP/1 status line plus header block.
    ///
    /// Versions other than HTTP/1.0 are written as HTTP/1.1: the blob is only
    /// ever replayed as an HTTP/1 message.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.headers.len() * 32);
        let version = if self.version == Version::HTTP_10 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        };
        out.extend_from_slice(version.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        out.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Parse a blob produced by [`ResponseHead::encode`] (or any HTTP/1 head).
    pub fn decode(blob: &[u8]) -> Result<Self, HeadError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut slots);
        if parsed.parse(blob)?.is_partial() {
            return Err(HeadError::Incomplete);
        }

        let code = parsed.code.ok_or(HeadError::Incomplete)?;
        let status = StatusCode::from_u16(code).map_err(|_| HeadError::InvalidStatus(code))?;
        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| HeadError::InvalidHeader(header.name.to_string()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|_| HeadError::InvalidHeader(header.name.to_string()))?;
            headers.append(name, value);
        }

        Ok(Self {
            status,
            version,
            headers,
        })
    }

    /// Remove the `chunked` transfer coding, keeping any other codings.
    ///
    /// Returns whether anything was removed.
    pub fn strip_chunked(&mut self) -> bool {
        let codings: Vec<String> = self
            .headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if !codings.iter().any(|c| c.eq_ignore_ascii_case("chunked")) {
            return false;
        }

        self.headers.remove(TRANSFER_ENCODING);
        let kept: Vec<&str> = codings
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case("chunked"))
            .map(String::as_str)
            .collect();
        if !kept.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&kept.join(", ")) {
                self.headers.insert(TRANSFER_ENCODING, value);
            }
        }
        true
    }

    /// Declared `Content-Length`, if present and well formed.
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }
}

/// Declared `Content-Length` of a header map, if present and well formed.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
