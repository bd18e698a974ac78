//! Sub-resource discovery in HTML documents.
//!
//! # Responsibilities
//! - Define the extractor seam the orchestrator calls
//! - Provide the default extractor: scan the `<head>` section for
//!   scripts and stylesheets
//!
//! # Design Decisions
//! - Reads at most `limit` bytes of the (possibly compressed) body; a head
//!   that does not close within that window is reported as not found
//! - Only `identity`, `gzip` and `br` content-encodings are understood
//! - Returned URLs are raw attribute values in document order; resolving
//!   them against the document is the caller's job

use std::io::Read;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_ENCODING;
use regex::bytes::Regex;
use thiserror::Error;

use crate::http::body::Body;
use crate::http::head::ResponseHead;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no <head> section within the read limit")]
    HeadNotFound,

    #[error("unsupported content-encoding {0:?}")]
    EncodingUnsupported(String),

    #[error("failed to read document body: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds the sub-resources a document references.
#[async_trait]
pub trait ResourceExtractor: Send + Sync {
    /// Resource URLs referenced by the document, as written in it.
    async fn extract(&self, head: &ResponseHead, body: Body) -> Result<Vec<String>, ExtractError>;
}

/// Default extractor: `<script src>` and stylesheet `<link href>` values
/// inside `<head>`.
#[derive(Debug, Clone)]
pub struct HeadScanner {
    limit: usize,
}

impl HeadScanner {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl ResourceExtractor for HeadScanner {
    async fn extract(&self, head: &ResponseHead, body: Body) -> Result<Vec<String>, ExtractError> {
        let encoding = content_encoding(head)?;
        let (raw, _rest) = body.collect_prefix(self.limit).await?;
        let decoded = decode(encoding, raw, self.limit)?;
        let section = head_section(&decoded).ok_or(ExtractError::HeadNotFound)?;
        Ok(resources_in(section))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Identity,
    Gzip,
    Brotli,
}

fn content_encoding(head: &ResponseHead) -> Result<Encoding, ExtractError> {
    let Some(value) = head.headers.get(CONTENT_ENCODING) else {
        return Ok(Encoding::Identity);
    };
    let value = value.to_str().map_err(|_| {
        ExtractError::EncodingUnsupported(String::from_utf8_lossy(value.as_bytes()).into_owned())
    })?;
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "" | "identity" => Ok(Encoding::Identity),
        "gzip" | "x-gzip" => Ok(Encoding::Gzip),
        "br" => Ok(Encoding::Brotli),
        _ => Err(ExtractError::EncodingUnsupported(value.to_string())),
    }
}

/// Decode up to `limit` bytes. A compressed prefix cut off by the read limit
/// yields whatever decoded before the cut.
fn decode(encoding: Encoding, raw: Bytes, limit: usize) -> Result<Vec<u8>, ExtractError> {
    match encoding {
        Encoding::Identity => Ok(raw.to_vec()),
        Encoding::Gzip => read_partial(flate2::read::MultiGzDecoder::new(&raw[..]), limit),
        Encoding::Brotli => read_partial(brotli::Decompressor::new(&raw[..], 4096), limit),
    }
}

fn read_partial<R: Read>(mut reader: R, limit: usize) -> Result<Vec<u8>, ExtractError> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    while out.len() < limit {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // Truncated stream: keep what decoded so far.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) if out.is_empty() => return Err(e.into()),
            Err(_) => break,
        }
    }
    out.truncate(limit);
    Ok(out)
}

fn head_regex() -> &'static Regex {
    static HEAD: OnceLock<Regex> = OnceLock::new();
    HEAD.get_or_init(|| Regex::new(r"(?is)<head\b[^>]*>.*?</head\s*>").expect("static pattern"))
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"(?is)<(script|link)\b([^>]*)>").expect("static pattern"))
}

fn attr_regex() -> &'static Regex {
    static ATTR: OnceLock<Regex> = OnceLock::new();
    ATTR.get_or_init(|| {
        Regex::new(r#"(?is)([a-z][a-z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("static pattern")
    })
}

fn head_section(document: &[u8]) -> Option<&[u8]> {
    head_regex().find(document).map(|m| m.as_bytes())
}

fn attribute(attrs: &[u8], name: &str) -> Option<String> {
    attr_regex().captures_iter(attrs).find_map(|caps| {
        let key = caps.get(1)?;
        if !key.as_bytes().eq_ignore_ascii_case(name.as_bytes()) {
            return None;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).or_else(|| caps.get(4))?;
        Some(String::from_utf8_lossy(value.as_bytes()).trim().to_string())
    })
}

fn is_stylesheet(attrs: &[u8]) -> bool {
    let rel = attribute(attrs, "rel").unwrap_or_default();
    let mut rels = rel.split_ascii_whitespace();
    if rels.clone().any(|r| r.eq_ignore_ascii_case("stylesheet")) {
        return true;
    }
    rels.any(|r| r.eq_ignore_ascii_case("preload"))
        && attribute(attrs, "as").is_some_and(|a| a.eq_ignore_ascii_case("style"))
}

fn resources_in(section: &[u8]) -> Vec<String> {
    let mut resources = Vec::new();
    for caps in tag_regex().captures_iter(section) {
        let (Some(tag), Some(attrs)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let attrs = attrs.as_bytes();
        let url = if tag.as_bytes().eq_ignore_ascii_case(b"script") {
            attribute(attrs, "src")
        } else if is_stylesheet(attrs) {
            attribute(attrs, "href")
        } else {
            None
        };
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            resources.push(url);
        }
    }
    resources
}
