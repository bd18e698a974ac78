//! Request shaping for the speculative path.
//!
//! # Responsibilities
//! - Decide which origin responses are documents worth scanning
//! - Decide which client requests may be answered by a push
//! - Resolve discovered references and build the synthetic fetches

use std::path::Path;

use http::header::{CONTENT_TYPE, RANGE};
use http::{Method, Request, Response, StatusCode};
use url::Url;

use crate::http::body::Body;

/// Status the server side answers with while a resource is being
/// prefetched. Never terminal for the racing client.
pub const PREFETCH_IN_FLIGHT: u16 = 599;

/// Headers every speculative fetch carries, so origins answer it the way
/// they would answer a browser.
pub const PREFETCH_REQUEST_HEADERS: [(&str, &str); 5] = [
    ("accept", "*/*"),
    ("cache-control", "public"),
    ("accept-encoding", "gzip, deflate, br"),
    ("accept-language", "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7"),
    (
        "user-agent",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/115.0.0.0 Safari/537.36",
    ),
];

/// A `200` answer to a `GET` whose content type mentions `text/html`.
pub fn is_document_response<B>(method: &Method, response: &Response<B>) -> bool {
    response.status() == StatusCode::OK
        && method == Method::GET
        && response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"))
}

/// A `GET` without `Range` whose path ends in one of `extensions`.
pub fn is_prefetchable_request<B>(request: &Request<B>, extensions: &[String]) -> bool {
    if request.method() != Method::GET || request.headers().contains_key(RANGE) {
        return false;
    }
    Path::new(request.uri().path())
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e == ext))
}

/// Resolve a reference found in `document`. Relative and protocol-relative
/// forms inherit the document's scheme and host. Only http(s) targets are
/// kept.
pub fn resolve(document: &Url, reference: &str) -> Option<Url> {
    let mut url = document.join(reference.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// The synthetic `GET` a speculative fetch sends.
pub fn build_prefetch_request(url: &Url) -> Result<Request<Body>, http::Error> {
    let mut builder = Request::builder().method(Method::GET).uri(url.as_str());
    for (name, value) in PREFETCH_REQUEST_HEADERS {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty())
}

/// Answer for a real request whose resource is currently being prefetched.
pub fn in_flight_response() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    if let Ok(status) = StatusCode::from_u16(PREFETCH_IN_FLIGHT) {
        *response.status_mut() = status;
    }
    response
}

pub fn is_in_flight_status(status: StatusCode) -> bool {
    status.as_u16() == PREFETCH_IN_FLIGHT
}
